//! The provider context: descriptor table, pre-opens, and the operation
//! surface the embedding engine calls into.

use crate::clocks::WasiClocks;
use crate::errno::{Errno, Result};
use crate::random::OsEntropy;
use crate::rights::Rights;
use crate::table::Table;
use crate::types::{
    Advice, ClockId, DirCookie, DirEntry, ExitCode, Fd, FdFlags, FdStat, FileDelta, FileSize,
    FileStat, FileType, FstFlags, Inode, LookupFlags, OpenFlags, PreStat, RiFlags, RoFlags,
    SdFlags, SiFlags, Signal, Size, Timestamp, Whence,
};
use rustix::fs::{AtFlags, Mode, OFlags, SeekFrom, Timestamps};
use rustix::time::Timespec;
use std::collections::HashSet;
use std::fs;
use std::io::{self, IoSlice, IoSliceMut, Read};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::os::unix::fs::MetadataExt;
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::trace;

/// Hook invoked by `sched_yield`.
pub type YieldFn = Box<dyn Fn() -> io::Result<()> + Send>;
/// Hook invoked by `proc_exit` with the guest's exit code.
pub type ExitFn = Box<dyn Fn(ExitCode) -> io::Result<()> + Send>;
/// Hook invoked by `proc_raise` with the guest's signal number.
pub type RaiseFn = Box<dyn Fn(Signal) -> io::Result<()> + Send>;

/// One open guest descriptor: the owned host handle, the composed path used
/// for relative re-resolution and directory listings, the descriptor status
/// (type, flags, rights), and the cached directory listing.
pub(crate) struct Descriptor {
    pub(crate) host: OwnedFd,
    pub(crate) path: String,
    pub(crate) stat: FdStat,
    dir_entries: Option<Vec<DirListEntry>>,
    /// Marks handles inherited from the host's stdio, whose stat output is
    /// partially masked.
    stdio: bool,
}

impl Descriptor {
    fn new(host: OwnedFd, path: String, stat: FdStat) -> Descriptor {
        Descriptor {
            host,
            path,
            stat,
            dir_entries: None,
            stdio: false,
        }
    }
}

struct DirListEntry {
    name: String,
    filetype: FileType,
    ino: Inode,
}

/// A WASI preview 1 provider backed by the host operating system.
///
/// The context is not safe for concurrent use: it assumes a single guest
/// invoker at a time, and every operation completes before the next begins.
/// Dropping (or [`close`](WasiCtx::close)-ing) the context closes every
/// host handle it still owns, exactly once.
pub struct WasiCtx {
    args: Vec<String>,
    env: Vec<String>,
    pub(crate) clocks: WasiClocks,
    random: Box<dyn Read + Send>,
    yield_hook: Option<YieldFn>,
    exit_hook: Option<ExitFn>,
    raise_hook: Option<RaiseFn>,
    pub(crate) interrupt: Option<OwnedFd>,
    fds: Table<Descriptor>,
    preopens: HashSet<Fd>,
}

/// Builder for [`WasiCtx`].
pub struct WasiCtxBuilder {
    args: Vec<String>,
    env: Vec<String>,
    clocks: WasiClocks,
    random: Box<dyn Read + Send>,
    yield_hook: Option<YieldFn>,
    exit_hook: Option<ExitFn>,
    raise_hook: Option<RaiseFn>,
    interrupt: Option<OwnedFd>,
}

impl WasiCtxBuilder {
    pub fn new() -> WasiCtxBuilder {
        WasiCtxBuilder {
            args: Vec::new(),
            env: Vec::new(),
            clocks: WasiClocks::default(),
            random: Box::new(OsEntropy),
            yield_hook: None,
            exit_hook: None,
            raise_hook: None,
            interrupt: None,
        }
    }

    /// The argument strings reported by `args_get`. The first is
    /// conventionally the program name.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// The environment strings reported by `environ_get`, in `KEY=VALUE`
    /// form.
    pub fn envs<I, S>(mut self, env: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.env = env.into_iter().map(Into::into).collect();
        self
    }

    pub fn clocks(mut self, clocks: WasiClocks) -> Self {
        self.clocks = clocks;
        self
    }

    /// Replaces the default OS entropy source behind `random_get`.
    pub fn entropy(mut self, source: impl Read + Send + 'static) -> Self {
        self.random = Box::new(source);
        self
    }

    pub fn yield_hook(mut self, hook: impl Fn() -> io::Result<()> + Send + 'static) -> Self {
        self.yield_hook = Some(Box::new(hook));
        self
    }

    pub fn exit_hook(mut self, hook: impl Fn(ExitCode) -> io::Result<()> + Send + 'static) -> Self {
        self.exit_hook = Some(Box::new(hook));
        self
    }

    pub fn raise_hook(mut self, hook: impl Fn(Signal) -> io::Result<()> + Send + 'static) -> Self {
        self.raise_hook = Some(Box::new(hook));
        self
    }

    /// A descriptor (the read end of a pipe or an eventfd) that becomes
    /// readable when the embedder wants to cancel the guest. It is observed
    /// by the descriptor-less sleep path of `poll_oneoff`.
    pub fn interrupt(mut self, fd: OwnedFd) -> Self {
        self.interrupt = Some(fd);
        self
    }

    pub fn build(self) -> WasiCtx {
        WasiCtx {
            args: self.args,
            env: self.env,
            clocks: self.clocks,
            random: self.random,
            yield_hook: self.yield_hook,
            exit_hook: self.exit_hook,
            raise_hook: self.raise_hook,
            interrupt: self.interrupt,
            fds: Table::new(),
            preopens: HashSet::new(),
        }
    }
}

impl Default for WasiCtxBuilder {
    fn default() -> Self {
        WasiCtxBuilder::new()
    }
}

impl WasiCtx {
    pub fn builder() -> WasiCtxBuilder {
        WasiCtxBuilder::new()
    }

    /// Registers `host` as a pre-opened descriptor rooted at `path`,
    /// returning the guest descriptor number. Rights are masked to the
    /// defined set. Pre-opens are registered before the guest runs; the
    /// guest may still tighten their rights or close them.
    pub fn preopen(&mut self, host: OwnedFd, path: impl Into<String>, mut stat: FdStat) -> Fd {
        stat.rights_base &= Rights::ALL;
        stat.rights_inheriting &= Rights::ALL;
        let path = path.into();
        let fd = self.fds.insert(Descriptor::new(host, path.clone(), stat));
        self.preopens.insert(fd);
        trace!(fd, path = %path, "registered pre-open");
        fd
    }

    /// Duplicates the host's stdin/stdout/stderr and pre-opens them at the
    /// conventional guest slots 0/1/2 as character devices with full
    /// rights. Call before any other pre-open so the slots line up.
    pub fn inherit_stdio(&mut self) -> io::Result<()> {
        let stat = FdStat {
            file_type: FileType::CharacterDevice,
            flags: FdFlags::empty(),
            rights_base: Rights::ALL,
            rights_inheriting: Rights::ALL,
        };
        for (fd, path) in [
            (rustix::stdio::stdin(), "/dev/stdin"),
            (rustix::stdio::stdout(), "/dev/stdout"),
            (rustix::stdio::stderr(), "/dev/stderr"),
        ] {
            let dup = rustix::io::dup(fd)?;
            let guest_fd = self.preopen(dup, path, stat);
            if let Some(f) = self.fds.lookup_mut(guest_fd) {
                f.stdio = true;
            }
        }
        Ok(())
    }

    /// Drains the descriptor table and the pre-open set, closing every host
    /// handle still owned. Buffers are not flushed.
    pub fn close(&mut self) {
        if !self.fds.is_empty() {
            trace!(open = self.fds.len(), "closing provider");
            for (fd, _) in self.fds.iter() {
                trace!(fd, "closing descriptor");
            }
        }
        self.fds.reset();
        self.preopens.clear();
    }

    pub(crate) fn lookup(&self, fd: Fd, rights: Rights) -> Result<&Descriptor> {
        let f = self.fds.lookup(fd).ok_or(Errno::Badf)?;
        if !f.stat.rights_base.contains(rights) {
            return Err(Errno::Notcapable);
        }
        Ok(f)
    }

    fn lookup_mut(&mut self, fd: Fd, rights: Rights) -> Result<&mut Descriptor> {
        let f = self.fds.lookup_mut(fd).ok_or(Errno::Badf)?;
        if !f.stat.rights_base.contains(rights) {
            return Err(Errno::Notcapable);
        }
        Ok(f)
    }

    /// Like [`lookup`](Self::lookup), but any one of `rights` suffices.
    fn lookup_any(&self, fd: Fd, rights: Rights) -> Result<&Descriptor> {
        let f = self.fds.lookup(fd).ok_or(Errno::Badf)?;
        if !f.stat.rights_base.intersects(rights) {
            return Err(Errno::Notcapable);
        }
        Ok(f)
    }

    fn lookup_preopen(&self, fd: Fd) -> Result<&Descriptor> {
        if !self.preopens.contains(&fd) {
            return Err(Errno::Badf);
        }
        let f = self.lookup(fd, Rights::empty())?;
        if f.stat.file_type != FileType::Directory {
            return Err(Errno::Notdir);
        }
        Ok(f)
    }

    fn lookup_socket(&self, fd: Fd, rights: Rights) -> Result<&Descriptor> {
        let f = self.lookup(fd, rights)?;
        match f.stat.file_type {
            FileType::SocketStream | FileType::SocketDgram => Ok(f),
            _ => Err(Errno::Notsock),
        }
    }

    // === Arguments and environment ======================================

    pub fn args_get(&self) -> Result<&[String]> {
        Ok(&self.args)
    }

    pub fn environ_get(&self) -> Result<&[String]> {
        Ok(&self.env)
    }

    // === Clocks =========================================================

    pub fn clock_res_get(&self, id: ClockId) -> Result<Timestamp> {
        self.clocks.res_get(id)
    }

    /// `precision` is advisory and not enforced.
    pub fn clock_time_get(&self, id: ClockId, _precision: Timestamp) -> Result<Timestamp> {
        self.clocks.time_get(id)
    }

    // === Descriptor lifecycle ===========================================

    /// Closes a descriptor. No rights are required, and closing a pre-open
    /// is allowed; the slot is removed from both tables.
    pub fn fd_close(&mut self, fd: Fd) -> Result<()> {
        let f = self.fds.delete(fd).ok_or(Errno::Badf)?;
        self.preopens.remove(&fd);
        trace!(fd, "closed descriptor");
        drop(f);
        Ok(())
    }

    /// Moves the descriptor at `from` to `to`, closing whatever `to` held.
    /// Pre-opens cannot be renumbered.
    pub fn fd_renumber(&mut self, from: Fd, to: Fd) -> Result<()> {
        if self.preopens.contains(&from) || self.preopens.contains(&to) {
            return Err(Errno::Notsup);
        }
        let Some(f) = self.fds.delete(from) else {
            return Err(Errno::Badf);
        };
        if let Some(evicted) = self.fds.assign(to, f) {
            trace!(from, to, "renumber evicted an open descriptor");
            drop(evicted);
        }
        Ok(())
    }

    // === Descriptor metadata ============================================

    pub fn fd_fdstat_get(&self, fd: Fd) -> Result<FdStat> {
        let f = self.lookup(fd, Rights::empty())?;
        Ok(f.stat)
    }

    /// Applies flag changes through the host. Only `APPEND` and `NONBLOCK`
    /// can be toggled; a difference in any sync flag is unsupported.
    pub fn fd_fdstat_set_flags(&mut self, fd: Fd, flags: FdFlags) -> Result<()> {
        let f = self.lookup_mut(fd, Rights::FD_FDSTAT_SET_FLAGS)?;
        let changes = flags ^ f.stat.flags;
        if changes.is_empty() {
            return Ok(());
        }
        if changes.intersects(FdFlags::SYNC | FdFlags::DSYNC | FdFlags::RSYNC) {
            return Err(Errno::Nosys);
        }
        let mut host_flags = rustix::fs::fcntl_getfl(&f.host)?;
        host_flags.set(OFlags::APPEND, flags.contains(FdFlags::APPEND));
        host_flags.set(OFlags::NONBLOCK, flags.contains(FdFlags::NONBLOCK));
        rustix::fs::fcntl_setfl(&f.host, host_flags)?;
        f.stat.flags ^= changes;
        Ok(())
    }

    /// Rights can be preserved or dropped, never added.
    pub fn fd_fdstat_set_rights(
        &mut self,
        fd: Fd,
        rights_base: Rights,
        rights_inheriting: Rights,
    ) -> Result<()> {
        let f = self.lookup_mut(fd, Rights::empty())?;
        let rights_base = rights_base & Rights::ALL;
        let rights_inheriting = rights_inheriting & Rights::ALL;
        if !f.stat.rights_base.contains(rights_base) {
            return Err(Errno::Notcapable);
        }
        if !f.stat.rights_inheriting.contains(rights_inheriting) {
            return Err(Errno::Notcapable);
        }
        f.stat.rights_base = rights_base;
        f.stat.rights_inheriting = rights_inheriting;
        Ok(())
    }

    pub fn fd_filestat_get(&self, fd: Fd) -> Result<FileStat> {
        let f = self.lookup(fd, Rights::FD_FILESTAT_GET)?;
        let host_stat = rustix::fs::fstat(&f.host)?;
        let mut stat = FileStat::from_host(&host_stat);
        // The guest expects empty size and times for the stdio handles.
        // Inherited stdio is dup'd, so the handle number alone is not
        // enough to recognize it.
        if f.stdio || matches!(f.host.as_raw_fd(), 0..=2) {
            stat.size = 0;
            stat.atim = 0;
            stat.mtim = 0;
            stat.ctim = 0;
        }
        Ok(stat)
    }

    pub fn fd_filestat_set_size(&self, fd: Fd, size: FileSize) -> Result<()> {
        let f = self.lookup(fd, Rights::FD_FILESTAT_SET_SIZE)?;
        rustix::fs::ftruncate(&f.host, size)?;
        Ok(())
    }

    /// Updates the access/modification times. `*_NOW` flags read the
    /// monotonic clock; times not selected by `fst_flags` are preserved
    /// from the current stat.
    pub fn fd_filestat_set_times(
        &self,
        fd: Fd,
        mut atim: Timestamp,
        mut mtim: Timestamp,
        fst_flags: FstFlags,
    ) -> Result<()> {
        let f = self.lookup(fd, Rights::FD_FILESTAT_SET_TIMES)?;
        let host_stat = rustix::fs::fstat(&f.host)?;
        if fst_flags.intersects(FstFlags::ATIM_NOW | FstFlags::MTIM_NOW) {
            let Some(now_fn) = &self.clocks.monotonic else {
                return Err(Errno::Nosys);
            };
            let now = now_fn().map_err(Errno::from)?;
            if fst_flags.contains(FstFlags::ATIM_NOW) {
                atim = now;
            }
            if fst_flags.contains(FstFlags::MTIM_NOW) {
                mtim = now;
            }
        }
        let mut times = Timestamps {
            last_access: stat_timespec(host_stat.st_atime as i64, host_stat.st_atime_nsec as i64),
            last_modification: stat_timespec(
                host_stat.st_mtime as i64,
                host_stat.st_mtime_nsec as i64,
            ),
        };
        if fst_flags.intersects(FstFlags::ATIM | FstFlags::ATIM_NOW) {
            times.last_access = nanos_timespec(atim);
        }
        if fst_flags.intersects(FstFlags::MTIM | FstFlags::MTIM_NOW) {
            times.last_modification = nanos_timespec(mtim);
        }
        rustix::fs::futimens(&f.host, &times)?;
        Ok(())
    }

    // === Descriptor I/O =================================================

    pub fn fd_read(&self, fd: Fd, iovs: &mut [IoSliceMut<'_>]) -> Result<Size> {
        let f = self.lookup(fd, Rights::FD_READ)?;
        let n = rustix::io::readv(&f.host, iovs)?;
        Ok(n.try_into()?)
    }

    pub fn fd_write(&self, fd: Fd, iovs: &[IoSlice<'_>]) -> Result<Size> {
        let f = self.lookup(fd, Rights::FD_WRITE)?;
        let n = rustix::io::writev(&f.host, iovs)?;
        Ok(n.try_into()?)
    }

    /// Reads at `offset` without moving the descriptor's position.
    pub fn fd_pread(&self, fd: Fd, iovs: &mut [IoSliceMut<'_>], offset: FileSize) -> Result<Size> {
        let f = self.lookup(fd, Rights::FD_READ | Rights::FD_SEEK)?;
        let n = rustix::io::preadv(&f.host, iovs, offset)?;
        Ok(n.try_into()?)
    }

    /// Writes at `offset` without moving the descriptor's position.
    pub fn fd_pwrite(&self, fd: Fd, iovs: &[IoSlice<'_>], offset: FileSize) -> Result<Size> {
        let f = self.lookup(fd, Rights::FD_WRITE | Rights::FD_SEEK)?;
        let n = rustix::io::pwritev(&f.host, iovs, offset)?;
        Ok(n.try_into()?)
    }

    pub fn fd_seek(&self, fd: Fd, delta: FileDelta, whence: Whence) -> Result<FileSize> {
        // A zero-delta seek from the current position only observes the
        // offset, which FD_TELL already grants; FD_SEEK subsumes FD_TELL.
        let f = if delta == 0 && whence == Whence::Cur {
            self.lookup_any(fd, Rights::FD_SEEK | Rights::FD_TELL)?
        } else {
            self.lookup(fd, Rights::FD_SEEK)?
        };
        host_seek(&f.host, delta, whence)
    }

    pub fn fd_tell(&self, fd: Fd) -> Result<FileSize> {
        let f = self.lookup_any(fd, Rights::FD_SEEK | Rights::FD_TELL)?;
        host_seek(&f.host, 0, Whence::Cur)
    }

    pub fn fd_sync(&self, fd: Fd) -> Result<()> {
        let f = self.lookup(fd, Rights::FD_SYNC)?;
        rustix::fs::fsync(&f.host)?;
        Ok(())
    }

    pub fn fd_datasync(&self, fd: Fd) -> Result<()> {
        let f = self.lookup(fd, Rights::FD_DATASYNC)?;
        rustix::fs::fdatasync(&f.host)?;
        Ok(())
    }

    pub fn fd_advise(&self, fd: Fd, offset: FileSize, len: FileSize, advice: Advice) -> Result<()> {
        let f = self.lookup(fd, Rights::FD_ADVISE)?;
        host_advise(f.host.as_fd(), offset, len, advice)
    }

    pub fn fd_allocate(&self, fd: Fd, offset: FileSize, len: FileSize) -> Result<()> {
        let f = self.lookup(fd, Rights::FD_ALLOCATE)?;
        host_allocate(f.host.as_fd(), offset, len)
    }

    // === Directory I/O ==================================================

    pub fn fd_prestat_get(&self, fd: Fd) -> Result<PreStat> {
        let f = self.lookup_preopen(fd)?;
        Ok(PreStat::Dir {
            name_len: f.path.len() as Size,
        })
    }

    pub fn fd_prestat_dir_name(&self, fd: Fd) -> Result<&str> {
        let f = self.lookup_preopen(fd)?;
        Ok(&f.path)
    }

    /// Enumerates a directory. Cookie zero restarts: the host listing is
    /// reloaded into the descriptor's cache with synthetic `.` and `..`
    /// entries appended after the host entries. Entries are then emitted
    /// from index `cookie` until their serialized size reaches `buf_len`.
    pub fn fd_readdir(&mut self, fd: Fd, buf_len: Size, cookie: DirCookie) -> Result<Vec<DirEntry>> {
        let f = self.lookup_mut(fd, Rights::FD_READDIR)?;
        if cookie == 0 {
            let entries = load_dir_entries(&f.path)?;
            f.dir_entries = Some(entries);
        }
        if cookie > isize::MAX as DirCookie {
            return Err(Errno::Inval);
        }
        let entries = f.dir_entries.as_deref().unwrap_or(&[]);
        let mut out = Vec::new();
        let mut nbytes: Size = 0;
        for (index, entry) in entries.iter().enumerate().skip(cookie as usize) {
            if nbytes >= buf_len {
                break;
            }
            let entry = DirEntry {
                next: index as DirCookie + 1,
                ino: entry.ino,
                filetype: entry.filetype,
                name: entry.name.clone(),
            };
            nbytes = nbytes.saturating_add(entry.wire_size());
            out.push(entry);
        }
        Ok(out)
    }

    // === Path operations ================================================

    pub fn path_create_directory(&self, fd: Fd, path: &str) -> Result<()> {
        let d = self.lookup(fd, Rights::PATH_CREATE_DIRECTORY)?;
        check_path(path)?;
        rustix::fs::mkdirat(&d.host, path, Mode::from_raw_mode(0o755))?;
        Ok(())
    }

    pub fn path_filestat_get(&self, fd: Fd, flags: LookupFlags, path: &str) -> Result<FileStat> {
        let d = self.lookup(fd, Rights::PATH_FILESTAT_GET)?;
        check_path(path)?;
        let host_stat = rustix::fs::statat(&d.host, path, at_flags(flags))?;
        Ok(FileStat::from_host(&host_stat))
    }

    /// Like `fd_filestat_set_times`, except `*_NOW` uses the host's
    /// wall-clock time.
    pub fn path_filestat_set_times(
        &self,
        fd: Fd,
        lookup_flags: LookupFlags,
        path: &str,
        mut atim: Timestamp,
        mut mtim: Timestamp,
        fst_flags: FstFlags,
    ) -> Result<()> {
        let d = self.lookup(fd, Rights::PATH_FILESTAT_SET_TIMES)?;
        check_path(path)?;
        if fst_flags.intersects(FstFlags::ATIM_NOW | FstFlags::MTIM_NOW) {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as Timestamp)
                .unwrap_or_default();
            if fst_flags.contains(FstFlags::ATIM_NOW) {
                atim = now;
            }
            if fst_flags.contains(FstFlags::MTIM_NOW) {
                mtim = now;
            }
        }
        let flags = at_flags(lookup_flags);
        let set_atim = fst_flags.intersects(FstFlags::ATIM | FstFlags::ATIM_NOW);
        let set_mtim = fst_flags.intersects(FstFlags::MTIM | FstFlags::MTIM_NOW);
        let mut times = Timestamps {
            last_access: nanos_timespec(0),
            last_modification: nanos_timespec(0),
        };
        if !set_atim || !set_mtim {
            // Preserve whichever timestamp is not being replaced.
            let host_stat = rustix::fs::statat(&d.host, path, flags)?;
            times.last_access =
                stat_timespec(host_stat.st_atime as i64, host_stat.st_atime_nsec as i64);
            times.last_modification =
                stat_timespec(host_stat.st_mtime as i64, host_stat.st_mtime_nsec as i64);
        }
        if set_atim {
            times.last_access = nanos_timespec(atim);
        }
        if set_mtim {
            times.last_modification = nanos_timespec(mtim);
        }
        rustix::fs::utimensat(&d.host, path, &times, flags)?;
        Ok(())
    }

    pub fn path_link(
        &self,
        fd: Fd,
        flags: LookupFlags,
        old_path: &str,
        new_fd: Fd,
        new_path: &str,
    ) -> Result<()> {
        let old_dir = self.lookup(fd, Rights::PATH_LINK_SOURCE)?;
        let new_dir = self.lookup(new_fd, Rights::PATH_LINK_TARGET)?;
        check_path(old_path)?;
        check_path(new_path)?;
        let at = if flags.contains(LookupFlags::SYMLINK_FOLLOW) {
            AtFlags::SYMLINK_FOLLOW
        } else {
            AtFlags::empty()
        };
        rustix::fs::linkat(&old_dir.host, old_path, &new_dir.host, new_path, at)?;
        Ok(())
    }

    /// Opens a file or directory relative to a directory descriptor.
    ///
    /// The requested rights pair must be a subset of the directory's
    /// inheriting rights; the opened descriptor carries the clipped pair.
    /// The normalized path must stay under the directory.
    pub fn path_open(
        &mut self,
        fd: Fd,
        lookup_flags: LookupFlags,
        path: &str,
        open_flags: OpenFlags,
        rights_base: Rights,
        rights_inheriting: Rights,
        fd_flags: FdFlags,
    ) -> Result<Fd> {
        let (host, composed_path, stat) = {
            let d = self.lookup(fd, Rights::PATH_OPEN)?;
            check_path(path)?;

            let mut rights_base = rights_base & Rights::ALL;
            let rights_inheriting = rights_inheriting & Rights::ALL;
            if !d.stat.rights_inheriting.contains(rights_base)
                || !d.stat.rights_inheriting.contains(rights_inheriting)
            {
                return Err(Errno::Notcapable);
            }

            let mut oflags = OFlags::CLOEXEC;
            if open_flags.contains(OpenFlags::DIRECTORY) {
                oflags |= OFlags::DIRECTORY;
                // Directories cannot seek, and must not pass the right on.
                rights_base.remove(Rights::FD_SEEK);
            }
            if open_flags.contains(OpenFlags::CREAT) {
                if !d.stat.rights_base.contains(Rights::PATH_CREATE_FILE) {
                    return Err(Errno::Notcapable);
                }
                oflags |= OFlags::CREATE;
            }
            if open_flags.contains(OpenFlags::EXCL) {
                oflags |= OFlags::EXCL;
            }
            if open_flags.contains(OpenFlags::TRUNC) {
                if !d.stat.rights_base.contains(Rights::PATH_FILESTAT_SET_SIZE) {
                    return Err(Errno::Notcapable);
                }
                oflags |= OFlags::TRUNC;
            }
            if fd_flags.contains(FdFlags::RSYNC) {
                // No host open flag maps to RSYNC.
                return Err(Errno::Nosys);
            }
            if fd_flags.contains(FdFlags::APPEND) {
                oflags |= OFlags::APPEND;
            }
            if fd_flags.contains(FdFlags::DSYNC) {
                oflags |= OFlags::DSYNC;
            }
            if fd_flags.contains(FdFlags::SYNC) {
                oflags |= OFlags::SYNC;
            }
            if fd_flags.contains(FdFlags::NONBLOCK) {
                oflags |= OFlags::NONBLOCK;
            }
            if !lookup_flags.contains(LookupFlags::SYMLINK_FOLLOW) {
                oflags |= OFlags::NOFOLLOW;
            }
            oflags |= if open_flags.contains(OpenFlags::DIRECTORY) {
                OFlags::RDONLY
            } else if rights_base.intersects(Rights::READ) && rights_base.intersects(Rights::WRITE)
            {
                OFlags::RDWR
            } else if rights_base.intersects(Rights::WRITE) {
                OFlags::WRONLY
            } else {
                OFlags::RDONLY
            };

            let (file_type, mode) = if oflags.contains(OFlags::DIRECTORY) {
                (FileType::Directory, Mode::empty())
            } else {
                (FileType::RegularFile, Mode::from_raw_mode(0o644))
            };
            let host = rustix::fs::openat(&d.host, path, oflags, mode)?;
            let stat = FdStat {
                file_type,
                flags: fd_flags,
                rights_base,
                rights_inheriting,
            };
            (host, join_path(&d.path, path), stat)
        };
        let guest_fd = self
            .fds
            .insert(Descriptor::new(host, composed_path, stat));
        trace!(dirfd = fd, path, guest_fd, "opened path");
        Ok(guest_fd)
    }

    /// Fills `buf` with the target of a symbolic link. A target that does
    /// not leave room in the buffer reports `ERANGE`.
    pub fn path_readlink(&self, fd: Fd, path: &str, buf: &mut [u8]) -> Result<Size> {
        let d = self.lookup(fd, Rights::PATH_READLINK)?;
        check_path(path)?;
        let target = rustix::fs::readlinkat(&d.host, path, Vec::with_capacity(buf.len()))?;
        let target = target.into_bytes();
        if target.len() >= buf.len() {
            return Err(Errno::Range);
        }
        buf[..target.len()].copy_from_slice(&target);
        Ok(target.len() as Size)
    }

    pub fn path_remove_directory(&self, fd: Fd, path: &str) -> Result<()> {
        let d = self.lookup(fd, Rights::PATH_REMOVE_DIRECTORY)?;
        check_path(path)?;
        rustix::fs::unlinkat(&d.host, path, AtFlags::REMOVEDIR)?;
        Ok(())
    }

    pub fn path_rename(&self, fd: Fd, old_path: &str, new_fd: Fd, new_path: &str) -> Result<()> {
        let old_dir = self.lookup(fd, Rights::PATH_RENAME_SOURCE)?;
        let new_dir = self.lookup(new_fd, Rights::PATH_RENAME_TARGET)?;
        check_path(old_path)?;
        check_path(new_path)?;
        rustix::fs::renameat(&old_dir.host, old_path, &new_dir.host, new_path)?;
        Ok(())
    }

    /// Creates a symlink at `new_path` whose content is `old_path`. The
    /// content is data, not a resolved path, so only `new_path` is checked.
    pub fn path_symlink(&self, old_path: &str, fd: Fd, new_path: &str) -> Result<()> {
        let d = self.lookup(fd, Rights::PATH_SYMLINK)?;
        check_path(new_path)?;
        rustix::fs::symlinkat(old_path, &d.host, new_path)?;
        Ok(())
    }

    pub fn path_unlink_file(&self, fd: Fd, path: &str) -> Result<()> {
        let d = self.lookup(fd, Rights::PATH_UNLINK_FILE)?;
        check_path(path)?;
        rustix::fs::unlinkat(&d.host, path, AtFlags::empty())?;
        Ok(())
    }

    // === Sockets ========================================================

    /// Accepts a connection on a listening socket. The new descriptor is a
    /// stream socket carrying the parent's inheriting rights.
    pub fn sock_accept(&mut self, fd: Fd, flags: FdFlags) -> Result<Fd> {
        let (conn, stat) = {
            let socket = self.lookup_socket(fd, Rights::SOCK_ACCEPT)?;
            if !(flags & !FdFlags::NONBLOCK).is_empty() {
                return Err(Errno::Inval);
            }
            let conn = rustix::net::accept(&socket.host)?;
            rustix::io::ioctl_fionbio(&conn, flags.contains(FdFlags::NONBLOCK))?;
            let stat = FdStat {
                file_type: FileType::SocketStream,
                flags,
                rights_base: socket.stat.rights_inheriting,
                rights_inheriting: socket.stat.rights_inheriting,
            };
            (conn, stat)
        };
        let guest_fd = self.fds.insert(Descriptor::new(conn, String::new(), stat));
        trace!(fd, guest_fd, "accepted connection");
        Ok(guest_fd)
    }

    pub fn sock_recv(
        &self,
        fd: Fd,
        _iovs: &mut [IoSliceMut<'_>],
        _flags: RiFlags,
    ) -> Result<(Size, RoFlags)> {
        self.lookup_socket(fd, Rights::FD_READ)?;
        Err(Errno::Nosys)
    }

    pub fn sock_send(&self, fd: Fd, _iovs: &[IoSlice<'_>], _flags: SiFlags) -> Result<Size> {
        self.lookup_socket(fd, Rights::FD_WRITE)?;
        Err(Errno::Nosys)
    }

    pub fn sock_shutdown(&self, fd: Fd, how: SdFlags) -> Result<()> {
        let socket = self.lookup_socket(fd, Rights::SOCK_SHUTDOWN)?;
        let how = if how.contains(SdFlags::RD | SdFlags::WR) {
            rustix::net::Shutdown::ReadWrite
        } else if how.contains(SdFlags::RD) {
            rustix::net::Shutdown::Read
        } else if how.contains(SdFlags::WR) {
            rustix::net::Shutdown::Write
        } else {
            return Err(Errno::Inval);
        };
        rustix::net::shutdown(&socket.host, how)?;
        Ok(())
    }

    // === Process and scheduling =========================================

    pub fn proc_exit(&self, code: ExitCode) -> Result<()> {
        match &self.exit_hook {
            Some(exit) => exit(code).map_err(Errno::from),
            None => Err(Errno::Nosys),
        }
    }

    pub fn proc_raise(&self, signal: Signal) -> Result<()> {
        match &self.raise_hook {
            Some(raise) => raise(signal).map_err(Errno::from),
            None => Err(Errno::Nosys),
        }
    }

    pub fn sched_yield(&self) -> Result<()> {
        match &self.yield_hook {
            Some(yield_now) => yield_now().map_err(Errno::from),
            None => Err(Errno::Nosys),
        }
    }

    // === Random =========================================================

    pub fn random_get(&mut self, buf: &mut [u8]) -> Result<()> {
        self.random.read_exact(buf).map_err(|_| Errno::Io)
    }
}

impl Drop for WasiCtx {
    fn drop(&mut self) {
        self.close();
    }
}

fn host_seek(fd: &OwnedFd, delta: FileDelta, whence: Whence) -> Result<FileSize> {
    let pos = match whence {
        Whence::Set => SeekFrom::Start(delta as u64),
        Whence::Cur => SeekFrom::Current(delta),
        Whence::End => SeekFrom::End(delta),
    };
    Ok(rustix::fs::seek(fd, pos)?)
}

fn at_flags(flags: LookupFlags) -> AtFlags {
    if flags.contains(LookupFlags::SYMLINK_FOLLOW) {
        AtFlags::empty()
    } else {
        AtFlags::SYMLINK_NOFOLLOW
    }
}

fn stat_timespec(sec: i64, nsec: i64) -> Timespec {
    Timespec {
        tv_sec: sec as _,
        tv_nsec: nsec as _,
    }
}

fn nanos_timespec(t: Timestamp) -> Timespec {
    Timespec {
        tv_sec: (t / 1_000_000_000) as _,
        tv_nsec: (t % 1_000_000_000) as _,
    }
}

/// True if the path is absolute or its lexical normalization escapes the
/// directory it is resolved against.
fn path_escapes(path: &str) -> bool {
    if path.starts_with('/') {
        return true;
    }
    let mut depth: i64 = 0;
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                depth -= 1;
                if depth < 0 {
                    return true;
                }
            }
            _ => depth += 1,
        }
    }
    false
}

fn check_path(path: &str) -> Result<()> {
    if path_escapes(path) {
        return Err(Errno::Perm);
    }
    Ok(())
}

/// Lexically joins a relative path onto a descriptor's composed path.
fn join_path(base: &str, path: &str) -> String {
    let mut joined = PathBuf::from(base);
    for component in Path::new(path).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                joined.pop();
            }
            Component::Normal(name) => joined.push(name),
            Component::RootDir | Component::Prefix(_) => {}
        }
    }
    joined.to_string_lossy().into_owned()
}

/// Loads a directory listing from the host, appending synthetic `.` and
/// `..` entries after the host entries.
fn load_dir_entries(path: &str) -> Result<Vec<DirListEntry>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(path).map_err(Errno::from)? {
        let entry = entry.map_err(Errno::from)?;
        let meta = entry.metadata().map_err(Errno::from)?;
        let name = entry
            .file_name()
            .into_string()
            .map_err(|_| Errno::Ilseq)?;
        entries.push(DirListEntry {
            name,
            filetype: FileType::from_raw_mode(meta.mode()),
            ino: meta.ino(),
        });
    }
    if let Ok(meta) = fs::metadata(path) {
        entries.push(DirListEntry {
            name: ".".to_string(),
            filetype: FileType::from_raw_mode(meta.mode()),
            ino: meta.ino(),
        });
    }
    if let Ok(meta) = fs::metadata(Path::new(path).join("..")) {
        entries.push(DirListEntry {
            name: "..".to_string(),
            filetype: FileType::from_raw_mode(meta.mode()),
            ino: meta.ino(),
        });
    }
    Ok(entries)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn host_advise(fd: BorrowedFd<'_>, offset: FileSize, len: FileSize, advice: Advice) -> Result<()> {
    use rustix::fs::Advice as Host;
    let advice = match advice {
        Advice::Normal => Host::Normal,
        Advice::Sequential => Host::Sequential,
        Advice::Random => Host::Random,
        Advice::WillNeed => Host::WillNeed,
        Advice::DontNeed => Host::DontNeed,
        Advice::NoReuse => Host::NoReuse,
    };
    rustix::fs::fadvise(fd, offset, len, advice)?;
    Ok(())
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn host_advise(
    _fd: BorrowedFd<'_>,
    _offset: FileSize,
    _len: FileSize,
    _advice: Advice,
) -> Result<()> {
    Err(Errno::Nosys)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn host_allocate(fd: BorrowedFd<'_>, offset: FileSize, len: FileSize) -> Result<()> {
    rustix::fs::fallocate(fd, rustix::fs::FallocateFlags::empty(), offset, len)?;
    Ok(())
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn host_allocate(_fd: BorrowedFd<'_>, _offset: FileSize, _len: FileSize) -> Result<()> {
    Err(Errno::Nosys)
}
