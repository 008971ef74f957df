bitflags::bitflags! {
    /// Per-descriptor capability rights.
    ///
    /// Each bit grants the ability to invoke one operation (or one path
    /// action through a directory descriptor). Every operation declares the
    /// rights it requires and fails with `ENOTCAPABLE` when the descriptor
    /// is missing any of them. Rights only ever shrink over the life of a
    /// descriptor: they can be dropped with `fd_fdstat_set_rights` and are
    /// clipped against the directory's inheriting set on `path_open`.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct Rights: u64 {
        /// The right to invoke `fd_datasync`, and to open with `DSYNC` when
        /// `PATH_OPEN` is also set.
        const FD_DATASYNC = 1 << 0;
        /// The right to invoke `fd_read` and `sock_recv`. With `FD_SEEK`
        /// this includes `fd_pread`.
        const FD_READ = 1 << 1;
        /// The right to invoke `fd_seek`. Implies `FD_TELL`.
        const FD_SEEK = 1 << 2;
        const FD_FDSTAT_SET_FLAGS = 1 << 3;
        /// The right to invoke `fd_sync`, and to open with `RSYNC`/`SYNC`
        /// when `PATH_OPEN` is also set.
        const FD_SYNC = 1 << 4;
        /// The right to invoke `fd_tell`, and to invoke `fd_seek` in a way
        /// that leaves the offset unchanged.
        const FD_TELL = 1 << 5;
        /// The right to invoke `fd_write` and `sock_send`. With `FD_SEEK`
        /// this includes `fd_pwrite`.
        const FD_WRITE = 1 << 6;
        const FD_ADVISE = 1 << 7;
        const FD_ALLOCATE = 1 << 8;
        const PATH_CREATE_DIRECTORY = 1 << 9;
        /// Together with `PATH_OPEN`, the right to open with `CREAT`.
        const PATH_CREATE_FILE = 1 << 10;
        /// The right to be the source directory of `path_link`.
        const PATH_LINK_SOURCE = 1 << 11;
        /// The right to be the target directory of `path_link`.
        const PATH_LINK_TARGET = 1 << 12;
        const PATH_OPEN = 1 << 13;
        const FD_READDIR = 1 << 14;
        const PATH_READLINK = 1 << 15;
        /// The right to be the source directory of `path_rename`.
        const PATH_RENAME_SOURCE = 1 << 16;
        /// The right to be the target directory of `path_rename`.
        const PATH_RENAME_TARGET = 1 << 17;
        const PATH_FILESTAT_GET = 1 << 18;
        /// The right to change a file's size through a path: together with
        /// `PATH_OPEN`, the right to open with `TRUNC`. There is no
        /// `path_filestat_set_size` operation; this mirrors POSIX, which
        /// offers `ftruncate` but no `ftruncateat`.
        const PATH_FILESTAT_SET_SIZE = 1 << 19;
        const PATH_FILESTAT_SET_TIMES = 1 << 20;
        const FD_FILESTAT_GET = 1 << 21;
        const FD_FILESTAT_SET_SIZE = 1 << 22;
        const FD_FILESTAT_SET_TIMES = 1 << 23;
        const PATH_SYMLINK = 1 << 24;
        const PATH_REMOVE_DIRECTORY = 1 << 25;
        const PATH_UNLINK_FILE = 1 << 26;
        /// The right to subscribe a descriptor to `poll_oneoff` readiness.
        const POLL_FD_READWRITE = 1 << 27;
        const SOCK_SHUTDOWN = 1 << 28;
        const SOCK_ACCEPT = 1 << 29;
    }
}

impl Rights {
    /// The set of all defined rights.
    pub const ALL: Rights = Rights::from_bits_truncate((1 << 30) - 1);

    /// Rights related to reading.
    pub const READ: Rights = Rights::FD_READ.union(Rights::FD_READDIR);

    /// Rights related to writing.
    pub const WRITE: Rights = Rights::FD_WRITE
        .union(Rights::FD_ALLOCATE)
        .union(Rights::PATH_FILESTAT_SET_SIZE)
        .union(Rights::FD_DATASYNC);
}
