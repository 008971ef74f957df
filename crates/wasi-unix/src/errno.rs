//! WASI error codes and their mapping from host failures.

/// The subset of the WASI preview 1 error enumeration produced by this
/// provider. Discriminants are the ABI values; [`Errno::raw`] exposes them
/// for the embedding engine, which writes `Success` (zero) itself when an
/// operation returns `Ok`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[repr(u16)]
pub enum Errno {
    #[error("success")]
    Success = 0,
    #[error("argument list too long")]
    TooBig = 1,
    #[error("permission denied")]
    Acces = 2,
    #[error("resource unavailable, try again")]
    Again = 6,
    #[error("connection already in progress")]
    Already = 7,
    #[error("bad file descriptor")]
    Badf = 8,
    #[error("device or resource busy")]
    Busy = 10,
    #[error("operation canceled")]
    Canceled = 11,
    #[error("file exists")]
    Exist = 20,
    #[error("bad address")]
    Fault = 21,
    #[error("file too large")]
    Fbig = 22,
    #[error("illegal byte sequence")]
    Ilseq = 25,
    #[error("interrupted function")]
    Intr = 27,
    #[error("invalid argument")]
    Inval = 28,
    #[error("i/o error")]
    Io = 29,
    #[error("is a directory")]
    Isdir = 31,
    #[error("too many levels of symbolic links")]
    Loop = 32,
    #[error("file descriptor value too large")]
    Mfile = 33,
    #[error("too many links")]
    Mlink = 34,
    #[error("filename too long")]
    Nametoolong = 37,
    #[error("too many files open in system")]
    Nfile = 41,
    #[error("no such file or directory")]
    Noent = 44,
    #[error("not enough space")]
    Nomem = 48,
    #[error("no space left on device")]
    Nospc = 51,
    #[error("function not supported")]
    Nosys = 52,
    #[error("not a directory or a symbolic link to a directory")]
    Notdir = 54,
    #[error("directory not empty")]
    Notempty = 55,
    #[error("not a socket")]
    Notsock = 57,
    #[error("not supported, or operation not supported on socket")]
    Notsup = 58,
    #[error("value too large to be stored in data type")]
    Overflow = 61,
    #[error("operation not permitted")]
    Perm = 63,
    #[error("broken pipe")]
    Pipe = 64,
    #[error("result too large")]
    Range = 68,
    #[error("read-only file system")]
    Rofs = 69,
    #[error("invalid seek")]
    Spipe = 70,
    #[error("connection timed out")]
    Timedout = 73,
    #[error("text file busy")]
    Txtbsy = 74,
    #[error("cross-device link")]
    Xdev = 75,
    #[error("capabilities insufficient")]
    Notcapable = 76,
}

/// The result type of every provider operation.
pub type Result<T, E = Errno> = std::result::Result<T, E>;

impl Errno {
    /// The ABI value of this error code.
    pub fn raw(self) -> u16 {
        self as u16
    }
}

impl From<rustix::io::Errno> for Errno {
    fn from(errno: rustix::io::Errno) -> Self {
        use rustix::io::Errno as Host;
        match errno {
            Host::ACCESS => Errno::Acces,
            Host::AGAIN => Errno::Again,
            Host::ALREADY => Errno::Already,
            Host::BADF => Errno::Badf,
            Host::BUSY => Errno::Busy,
            Host::CANCELED => Errno::Canceled,
            Host::EXIST => Errno::Exist,
            Host::FAULT => Errno::Fault,
            Host::FBIG => Errno::Fbig,
            Host::ILSEQ => Errno::Ilseq,
            Host::INTR => Errno::Intr,
            Host::INVAL => Errno::Inval,
            Host::IO => Errno::Io,
            Host::ISDIR => Errno::Isdir,
            Host::LOOP => Errno::Loop,
            Host::MFILE => Errno::Mfile,
            Host::MLINK => Errno::Mlink,
            Host::NAMETOOLONG => Errno::Nametoolong,
            Host::NFILE => Errno::Nfile,
            Host::NOENT => Errno::Noent,
            Host::NOMEM => Errno::Nomem,
            Host::NOSPC => Errno::Nospc,
            Host::NOSYS => Errno::Nosys,
            Host::NOTDIR => Errno::Notdir,
            Host::NOTEMPTY => Errno::Notempty,
            Host::NOTSOCK => Errno::Notsock,
            Host::NOTSUP => Errno::Notsup,
            Host::OVERFLOW => Errno::Overflow,
            Host::PERM => Errno::Perm,
            Host::PIPE => Errno::Pipe,
            Host::RANGE => Errno::Range,
            Host::ROFS => Errno::Rofs,
            Host::SPIPE => Errno::Spipe,
            Host::TIMEDOUT => Errno::Timedout,
            Host::TXTBSY => Errno::Txtbsy,
            Host::XDEV => Errno::Xdev,

            // On some platforms, these have the same value as other errno
            // values.
            #[allow(unreachable_patterns)]
            Host::OPNOTSUPP => Errno::Notsup,

            other => {
                tracing::debug!("unmapped host errno: {other}");
                Errno::Io
            }
        }
    }
}

impl From<std::io::Error> for Errno {
    fn from(err: std::io::Error) -> Self {
        Errno::from(&err)
    }
}

impl<'a> From<&'a std::io::Error> for Errno {
    fn from(err: &'a std::io::Error) -> Self {
        match err.raw_os_error() {
            Some(code) => rustix::io::Errno::from_raw_os_error(code).into(),
            None => {
                tracing::debug!("host i/o error without an os code: {err}");
                match err.kind() {
                    std::io::ErrorKind::NotFound => Errno::Noent,
                    std::io::ErrorKind::PermissionDenied => Errno::Perm,
                    std::io::ErrorKind::AlreadyExists => Errno::Exist,
                    std::io::ErrorKind::InvalidInput => Errno::Inval,
                    std::io::ErrorKind::Interrupted => Errno::Intr,
                    std::io::ErrorKind::TimedOut => Errno::Timedout,
                    _ => Errno::Io,
                }
            }
        }
    }
}

impl From<std::num::TryFromIntError> for Errno {
    fn from(_err: std::num::TryFromIntError) -> Self {
        Errno::Overflow
    }
}
