//! # A WASI preview 1 host provider for Unix systems
//!
//! This crate services the system-call-like operations a WebAssembly guest
//! issues through the WASI preview 1 ABI, translating them onto the host's
//! POSIX primitives. It is the capability layer of an embedding: a dense
//! guest-descriptor table whose entries carry [`Rights`], with every
//! operation checked against those rights before any host syscall runs,
//! and all path resolution confined to pre-opened directories.
//!
//! The crate deliberately stops at the WASI type level. Decoding guest
//! memory (iovec lists, strings, result buffers) is the job of the
//! embedding engine, which calls these operations with already-decoded
//! values and writes the results back itself.
//!
//! # Example
//!
//! ```no_run
//! use std::fs::File;
//! use std::os::fd::OwnedFd;
//! use wasi_unix::{FdFlags, FdStat, FileType, Rights, WasiClocks, WasiCtx};
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut ctx = WasiCtx::builder()
//!         .args(["main.wasm"])
//!         .envs(["RUST_LOG=info"])
//!         .clocks(WasiClocks::system())
//!         .build();
//!
//!     // Stdio at guest descriptors 0/1/2, then one sandbox root.
//!     ctx.inherit_stdio()?;
//!     let root: OwnedFd = File::open("/srv/sandbox")?.into();
//!     ctx.preopen(
//!         root,
//!         "/srv/sandbox",
//!         FdStat {
//!             file_type: FileType::Directory,
//!             flags: FdFlags::empty(),
//!             rights_base: Rights::ALL,
//!             rights_inheriting: Rights::ALL,
//!         },
//!     );
//!
//!     // The engine now routes guest calls here, e.g.:
//!     let fd = ctx.path_open(
//!         3,
//!         wasi_unix::LookupFlags::SYMLINK_FOLLOW,
//!         "data/input.txt",
//!         wasi_unix::OpenFlags::empty(),
//!         Rights::FD_READ,
//!         Rights::empty(),
//!         FdFlags::empty(),
//!     )?;
//!     ctx.fd_close(fd)?;
//!     Ok(())
//! }
//! ```

mod clocks;
mod ctx;
mod errno;
mod poll;
mod random;
mod rights;
mod table;
mod types;

pub use clocks::{ClockFn, WasiClocks};
pub use ctx::{ExitFn, RaiseFn, WasiCtx, WasiCtxBuilder, YieldFn};
pub use errno::{Errno, Result};
pub use poll::{
    Event, EventFdReadWrite, EventRwFlags, EventType, Subscription, SubscriptionClock,
    SubscriptionClockFlags, SubscriptionFdReadWrite, SubscriptionU,
};
pub use random::OsEntropy;
pub use rights::Rights;
pub use types::{
    Advice, ClockId, Device, DirCookie, DirEntry, ExitCode, Fd, FdFlags, FdStat, FileDelta,
    FileSize, FileStat, FileType, FstFlags, Inode, LinkCount, LookupFlags, OpenFlags, PreStat,
    RiFlags, RoFlags, SdFlags, SiFlags, Signal, Size, Timestamp, UserData, Whence,
};
