//! WASI-level value types shared by every operation.
//!
//! These are the shapes the embedding engine decodes guest memory into and
//! encodes results from; the provider itself never touches guest memory.

use crate::errno::Errno;
use crate::rights::Rights;
use rustix::fs::RawMode;

pub type Fd = u32;
pub type Size = u32;
pub type FileSize = u64;
pub type FileDelta = i64;
/// Nanoseconds, since the host epoch for realtime values.
pub type Timestamp = u64;
pub type Device = u64;
pub type Inode = u64;
pub type LinkCount = u64;
pub type DirCookie = u64;
pub type UserData = u64;
pub type ExitCode = u32;
pub type Signal = u8;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum ClockId {
    Realtime = 0,
    Monotonic = 1,
    ProcessCputime = 2,
    ThreadCputime = 3,
}

impl TryFrom<u32> for ClockId {
    type Error = Errno;

    fn try_from(raw: u32) -> Result<Self, Errno> {
        match raw {
            0 => Ok(ClockId::Realtime),
            1 => Ok(ClockId::Monotonic),
            2 => Ok(ClockId::ProcessCputime),
            3 => Ok(ClockId::ThreadCputime),
            _ => Err(Errno::Inval),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Whence {
    Set = 0,
    Cur = 1,
    End = 2,
}

impl TryFrom<u8> for Whence {
    type Error = Errno;

    fn try_from(raw: u8) -> Result<Self, Errno> {
        match raw {
            0 => Ok(Whence::Set),
            1 => Ok(Whence::Cur),
            2 => Ok(Whence::End),
            _ => Err(Errno::Inval),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Advice {
    Normal = 0,
    Sequential = 1,
    Random = 2,
    WillNeed = 3,
    DontNeed = 4,
    NoReuse = 5,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum FileType {
    #[default]
    Unknown = 0,
    BlockDevice = 1,
    CharacterDevice = 2,
    Directory = 3,
    RegularFile = 4,
    SocketDgram = 5,
    SocketStream = 6,
    SymbolicLink = 7,
}

impl FileType {
    /// Decodes the `S_IFMT` bits of a host mode.
    pub fn from_raw_mode(mode: RawMode) -> FileType {
        use rustix::fs::FileType as Host;
        match Host::from_raw_mode(mode) {
            Host::RegularFile => FileType::RegularFile,
            Host::Directory => FileType::Directory,
            Host::Symlink => FileType::SymbolicLink,
            Host::CharacterDevice => FileType::CharacterDevice,
            Host::BlockDevice => FileType::BlockDevice,
            // The stat mode does not distinguish stream from datagram.
            Host::Socket => FileType::SocketStream,
            _ => FileType::Unknown,
        }
    }
}

bitflags::bitflags! {
    /// Descriptor status flags.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct FdFlags: u16 {
        const APPEND = 1 << 0;
        const DSYNC = 1 << 1;
        const NONBLOCK = 1 << 2;
        const RSYNC = 1 << 3;
        const SYNC = 1 << 4;
    }
}

bitflags::bitflags! {
    /// Flags determining how path resolution treats a final symlink.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct LookupFlags: u32 {
        const SYMLINK_FOLLOW = 1 << 0;
    }
}

bitflags::bitflags! {
    /// Open flags for `path_open`.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct OpenFlags: u16 {
        const CREAT = 1 << 0;
        const DIRECTORY = 1 << 1;
        const EXCL = 1 << 2;
        const TRUNC = 1 << 3;
    }
}

bitflags::bitflags! {
    /// Which timestamps a `*_set_times` call updates, and whether the
    /// current time is used instead of the supplied value.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct FstFlags: u16 {
        const ATIM = 1 << 0;
        const ATIM_NOW = 1 << 1;
        const MTIM = 1 << 2;
        const MTIM_NOW = 1 << 3;
    }
}

bitflags::bitflags! {
    /// Directions to shut down on a socket.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct SdFlags: u8 {
        const RD = 1 << 0;
        const WR = 1 << 1;
    }
}

bitflags::bitflags! {
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct RiFlags: u16 {
        const RECV_PEEK = 1 << 0;
        const RECV_WAITALL = 1 << 1;
    }
}

bitflags::bitflags! {
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct RoFlags: u16 {
        const RECV_DATA_TRUNCATED = 1 << 0;
    }
}

bitflags::bitflags! {
    /// No send flags are currently defined.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct SiFlags: u16 {}
}

/// The mutable status of an open descriptor: its type, flags, and the two
/// capability sets.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FdStat {
    pub file_type: FileType,
    pub flags: FdFlags,
    pub rights_base: Rights,
    pub rights_inheriting: Rights,
}

/// File attributes, as reported by `fd_filestat_get` and
/// `path_filestat_get`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FileStat {
    pub dev: Device,
    pub ino: Inode,
    pub filetype: FileType,
    pub nlink: LinkCount,
    pub size: FileSize,
    pub atim: Timestamp,
    pub mtim: Timestamp,
    pub ctim: Timestamp,
}

impl FileStat {
    /// Translates a host stat record. Timestamps are converted to
    /// nanoseconds and truncated into the unsigned range.
    pub fn from_host(stat: &rustix::fs::Stat) -> FileStat {
        FileStat {
            dev: stat.st_dev as Device,
            ino: stat.st_ino as Inode,
            filetype: FileType::from_raw_mode(stat.st_mode as RawMode),
            nlink: stat.st_nlink as LinkCount,
            size: stat.st_size as FileSize,
            atim: nanoseconds(stat.st_atime as i64, stat.st_atime_nsec as i64),
            mtim: nanoseconds(stat.st_mtime as i64, stat.st_mtime_nsec as i64),
            ctim: nanoseconds(stat.st_ctime as i64, stat.st_ctime_nsec as i64),
        }
    }
}

fn nanoseconds(sec: i64, nsec: i64) -> Timestamp {
    (sec as u64)
        .wrapping_mul(1_000_000_000)
        .wrapping_add(nsec as u64)
}

/// Description of a pre-opened descriptor.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PreStat {
    Dir { name_len: Size },
}

/// One entry produced by `fd_readdir`. The serialized form costs
/// [`DirEntry::WIRE_SIZE`] bytes plus the name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    /// The cookie that resumes enumeration just past this entry.
    pub next: DirCookie,
    pub ino: Inode,
    pub filetype: FileType,
    pub name: String,
}

impl DirEntry {
    /// The size of the fixed-layout part of a serialized entry.
    pub const WIRE_SIZE: Size = 24;

    pub fn wire_size(&self) -> Size {
        Self::WIRE_SIZE + self.name.len() as Size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whence_decoding() {
        assert_eq!(Whence::try_from(0), Ok(Whence::Set));
        assert_eq!(Whence::try_from(2), Ok(Whence::End));
        assert_eq!(Whence::try_from(3), Err(Errno::Inval));
    }

    #[test]
    fn clock_id_decoding() {
        assert_eq!(ClockId::try_from(1), Ok(ClockId::Monotonic));
        assert_eq!(ClockId::try_from(9), Err(Errno::Inval));
    }

    #[test]
    fn filetype_from_mode() {
        assert_eq!(FileType::from_raw_mode(0o040755), FileType::Directory);
        assert_eq!(FileType::from_raw_mode(0o100644), FileType::RegularFile);
        assert_eq!(FileType::from_raw_mode(0o120777), FileType::SymbolicLink);
        assert_eq!(FileType::from_raw_mode(0o010644), FileType::Unknown);
    }

    #[test]
    fn dir_entry_wire_size_counts_name() {
        let entry = DirEntry {
            next: 1,
            ino: 0,
            filetype: FileType::RegularFile,
            name: "hello".to_string(),
        };
        assert_eq!(entry.wire_size(), DirEntry::WIRE_SIZE + 5);
    }

    #[test]
    fn timestamps_truncate_into_unsigned() {
        // A pre-epoch time wraps rather than panicking.
        let t = nanoseconds(-1, 0);
        assert_eq!(t, (-1_000_000_000i64) as u64);
    }
}
