//! Filesystem and capability scenarios against a real temporary directory.

use std::fs::{self, File};
use std::io::{IoSlice, IoSliceMut};
use std::os::fd::OwnedFd;
use std::path::Path;
use tempfile::TempDir;
use wasi_unix::{
    DirEntry, Errno, Fd, FdFlags, FdStat, FileType, FstFlags, LookupFlags, OpenFlags, PreStat,
    Rights, Size, WasiClocks, WasiCtx, Whence,
};

fn open_dir(path: &Path) -> OwnedFd {
    File::open(path).unwrap().into()
}

fn dir_stat() -> FdStat {
    FdStat {
        file_type: FileType::Directory,
        flags: FdFlags::empty(),
        rights_base: Rights::ALL,
        rights_inheriting: Rights::ALL,
    }
}

/// A fresh provider with one pre-opened sandbox directory.
fn sandbox() -> (TempDir, WasiCtx, Fd) {
    let dir = tempfile::tempdir().unwrap();
    let mut ctx = WasiCtx::builder().clocks(WasiClocks::system()).build();
    let fd = ctx.preopen(
        open_dir(dir.path()),
        dir.path().to_str().unwrap(),
        dir_stat(),
    );
    assert_eq!(fd, 0);
    (dir, ctx, fd)
}

fn open_with(ctx: &mut WasiCtx, dir: Fd, path: &str, rights: Rights) -> Fd {
    ctx.path_open(
        dir,
        LookupFlags::SYMLINK_FOLLOW,
        path,
        OpenFlags::empty(),
        rights,
        Rights::empty(),
        FdFlags::empty(),
    )
    .unwrap()
}

#[test]
fn prestat_reports_the_mount_path() {
    let (dir, ctx, fd) = sandbox();
    let path = dir.path().to_str().unwrap();
    assert_eq!(
        ctx.fd_prestat_get(fd),
        Ok(PreStat::Dir {
            name_len: path.len() as Size,
        })
    );
    assert_eq!(ctx.fd_prestat_dir_name(fd), Ok(path));
    assert_eq!(ctx.fd_prestat_get(99), Err(Errno::Badf));
}

#[test]
fn closing_a_preopen_is_allowed_and_final() {
    let (_dir, mut ctx, fd) = sandbox();
    ctx.fd_close(fd).unwrap();
    assert_eq!(ctx.fd_fdstat_get(fd), Err(Errno::Badf));
    assert_eq!(ctx.fd_prestat_get(fd), Err(Errno::Badf));
    assert_eq!(ctx.fd_close(fd), Err(Errno::Badf));
    assert_eq!(ctx.fd_tell(fd), Err(Errno::Badf));
}

#[test]
fn operations_require_their_right() {
    let (dir, mut ctx, fd) = sandbox();
    fs::write(dir.path().join("file.txt"), b"hello").unwrap();
    let file = open_with(&mut ctx, fd, "file.txt", Rights::FD_READ);

    assert_eq!(
        ctx.fd_write(file, &[IoSlice::new(b"x")]),
        Err(Errno::Notcapable)
    );
    assert_eq!(ctx.fd_seek(file, 0, Whence::Set), Err(Errno::Notcapable));
    assert_eq!(ctx.fd_tell(file), Err(Errno::Notcapable));
    let mut buf = [0u8; 8];
    assert_eq!(
        ctx.fd_pread(file, &mut [IoSliceMut::new(&mut buf)], 0),
        Err(Errno::Notcapable)
    );
    assert_eq!(ctx.fd_sync(file), Err(Errno::Notcapable));
    assert_eq!(ctx.fd_filestat_get(file), Err(Errno::Notcapable));

    // The one granted right still works.
    let n = ctx
        .fd_read(file, &mut [IoSliceMut::new(&mut buf)])
        .unwrap();
    assert_eq!(&buf[..n as usize], b"hello");
}

#[test]
fn dropped_rights_never_come_back() {
    let (_dir, mut ctx, fd) = sandbox();
    ctx.fd_fdstat_set_rights(fd, Rights::FD_READ | Rights::PATH_OPEN, Rights::FD_READ)
        .unwrap();

    assert_eq!(
        ctx.fd_fdstat_set_rights(fd, Rights::ALL, Rights::empty()),
        Err(Errno::Notcapable)
    );
    assert_eq!(
        ctx.fd_fdstat_set_rights(fd, Rights::empty(), Rights::FD_WRITE),
        Err(Errno::Notcapable)
    );

    let stat = ctx.fd_fdstat_get(fd).unwrap();
    assert_eq!(stat.rights_base, Rights::FD_READ | Rights::PATH_OPEN);
    assert_eq!(stat.rights_inheriting, Rights::FD_READ);
}

#[test]
fn downgraded_preopen_cannot_create_files() {
    let (_dir, mut ctx, fd) = sandbox();
    ctx.fd_fdstat_set_rights(fd, Rights::empty(), Rights::empty())
        .unwrap();
    let err = ctx
        .path_open(
            fd,
            LookupFlags::SYMLINK_FOLLOW,
            "x",
            OpenFlags::CREAT,
            Rights::FD_READ | Rights::FD_WRITE,
            Rights::empty(),
            FdFlags::empty(),
        )
        .unwrap_err();
    assert_eq!(err, Errno::Notcapable);
}

#[test]
fn escaping_paths_are_rejected() {
    let (dir, mut ctx, fd) = sandbox();
    for path in ["/etc/passwd", "..", "../escape", "a/../../b"] {
        let err = ctx
            .path_open(
                fd,
                LookupFlags::SYMLINK_FOLLOW,
                path,
                OpenFlags::empty(),
                Rights::FD_READ,
                Rights::empty(),
                FdFlags::empty(),
            )
            .unwrap_err();
        assert_eq!(err, Errno::Perm, "path {path:?}");
    }
    assert_eq!(ctx.path_create_directory(fd, "../d"), Err(Errno::Perm));
    assert_eq!(
        ctx.path_filestat_get(fd, LookupFlags::SYMLINK_FOLLOW, "/x"),
        Err(Errno::Perm)
    );
    assert_eq!(ctx.path_unlink_file(fd, "../x"), Err(Errno::Perm));
    assert_eq!(ctx.path_rename(fd, "..", fd, "y"), Err(Errno::Perm));

    // None of the rejected calls created a descriptor: the next open still
    // lands in the lowest free slot.
    fs::write(dir.path().join("ok.txt"), b"ok").unwrap();
    let opened = open_with(&mut ctx, fd, "ok.txt", Rights::FD_READ);
    assert_eq!(opened, 1);
}

#[test]
fn read_write_seek_roundtrip() {
    let (dir, mut ctx, fd) = sandbox();
    let out = ctx
        .path_open(
            fd,
            LookupFlags::SYMLINK_FOLLOW,
            "out.txt",
            OpenFlags::CREAT,
            Rights::FD_WRITE | Rights::FD_SEEK | Rights::FD_FILESTAT_GET,
            Rights::empty(),
            FdFlags::empty(),
        )
        .unwrap();

    let n = ctx
        .fd_write(out, &[IoSlice::new(b"hello "), IoSlice::new(b"world")])
        .unwrap();
    assert_eq!(n, 11);
    assert_eq!(ctx.fd_filestat_get(out).unwrap().size, 11);
    assert_eq!(fs::read(dir.path().join("out.txt")).unwrap(), b"hello world");

    // Positioned writes leave the offset alone.
    let n = ctx.fd_pwrite(out, &[IoSlice::new(b"HELLO")], 0).unwrap();
    assert_eq!(n, 5);
    // The seek right subsumes telling.
    assert_eq!(ctx.fd_tell(out).unwrap(), 11);
    assert_eq!(ctx.fd_seek(out, 0, Whence::Cur).unwrap(), 11);

    let input = open_with(&mut ctx, fd, "out.txt", Rights::FD_READ | Rights::FD_SEEK | Rights::FD_TELL);
    let mut head = [0u8; 6];
    let mut tail = [0u8; 16];
    let n = ctx
        .fd_read(
            input,
            &mut [IoSliceMut::new(&mut head), IoSliceMut::new(&mut tail)],
        )
        .unwrap();
    assert_eq!(n, 11);
    assert_eq!(&head, b"HELLO ");
    assert_eq!(&tail[..5], b"world");

    assert_eq!(ctx.fd_seek(input, 6, Whence::Set).unwrap(), 6);
    let mut word = [0u8; 5];
    ctx.fd_read(input, &mut [IoSliceMut::new(&mut word)]).unwrap();
    assert_eq!(&word, b"world");
    assert_eq!(ctx.fd_tell(input).unwrap(), 11);
    assert_eq!(ctx.fd_seek(input, 0, Whence::End).unwrap(), 11);

    let mut probe = [0u8; 5];
    let n = ctx.fd_pread(input, &mut [IoSliceMut::new(&mut probe)], 6).unwrap();
    assert_eq!((n, &probe), (5, b"world"));
    assert_eq!(ctx.fd_tell(input).unwrap(), 11);
}

#[test]
fn tell_right_only_observes_the_offset() {
    let (dir, mut ctx, fd) = sandbox();
    fs::write(dir.path().join("f"), b"0123456789").unwrap();
    let file = open_with(&mut ctx, fd, "f", Rights::FD_READ | Rights::FD_TELL);

    assert_eq!(ctx.fd_tell(file).unwrap(), 0);
    assert_eq!(ctx.fd_seek(file, 0, Whence::Cur).unwrap(), 0);
    assert_eq!(ctx.fd_seek(file, 1, Whence::Cur), Err(Errno::Notcapable));
    assert_eq!(ctx.fd_seek(file, 0, Whence::Set), Err(Errno::Notcapable));
    assert_eq!(ctx.fd_seek(file, 0, Whence::End), Err(Errno::Notcapable));
}

#[test]
fn fdstat_set_flags_toggles_append_only() {
    let (_dir, mut ctx, fd) = sandbox();
    let file = ctx
        .path_open(
            fd,
            LookupFlags::SYMLINK_FOLLOW,
            "log.txt",
            OpenFlags::CREAT,
            Rights::FD_WRITE | Rights::FD_FDSTAT_SET_FLAGS,
            Rights::empty(),
            FdFlags::empty(),
        )
        .unwrap();

    ctx.fd_fdstat_set_flags(file, FdFlags::APPEND).unwrap();
    assert_eq!(ctx.fd_fdstat_get(file).unwrap().flags, FdFlags::APPEND);

    // No-op changes succeed without touching the host.
    ctx.fd_fdstat_set_flags(file, FdFlags::APPEND).unwrap();

    assert_eq!(
        ctx.fd_fdstat_set_flags(file, FdFlags::APPEND | FdFlags::SYNC),
        Err(Errno::Nosys)
    );
}

#[test]
fn filestat_set_size_and_times() {
    let (_dir, mut ctx, fd) = sandbox();
    let file = ctx
        .path_open(
            fd,
            LookupFlags::SYMLINK_FOLLOW,
            "sized.bin",
            OpenFlags::CREAT,
            Rights::FD_FILESTAT_SET_SIZE
                | Rights::FD_FILESTAT_SET_TIMES
                | Rights::FD_FILESTAT_GET,
            Rights::empty(),
            FdFlags::empty(),
        )
        .unwrap();

    ctx.fd_filestat_set_size(file, 4096).unwrap();
    assert_eq!(ctx.fd_filestat_get(file).unwrap().size, 4096);

    ctx.fd_filestat_set_times(
        file,
        1_000_000_000,
        2_000_000_000,
        FstFlags::ATIM | FstFlags::MTIM,
    )
    .unwrap();
    let stat = ctx.fd_filestat_get(file).unwrap();
    assert_eq!(stat.atim, 1_000_000_000);
    assert_eq!(stat.mtim, 2_000_000_000);

    // A *_NOW update touches only the selected timestamp.
    ctx.fd_filestat_set_times(file, 0, 0, FstFlags::MTIM_NOW)
        .unwrap();
    let stat = ctx.fd_filestat_get(file).unwrap();
    assert_eq!(stat.atim, 1_000_000_000);
    assert_ne!(stat.mtim, 2_000_000_000);
}

#[test]
fn set_times_now_needs_a_monotonic_clock() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctx = WasiCtx::builder().build();
    let fd = ctx.preopen(
        open_dir(dir.path()),
        dir.path().to_str().unwrap(),
        dir_stat(),
    );
    let file = ctx
        .path_open(
            fd,
            LookupFlags::SYMLINK_FOLLOW,
            "t.txt",
            OpenFlags::CREAT,
            Rights::FD_FILESTAT_SET_TIMES,
            Rights::empty(),
            FdFlags::empty(),
        )
        .unwrap();
    assert_eq!(
        ctx.fd_filestat_set_times(file, 0, 0, FstFlags::ATIM_NOW),
        Err(Errno::Nosys)
    );
    // Explicit timestamps do not involve the clock.
    ctx.fd_filestat_set_times(file, 7, 7, FstFlags::ATIM | FstFlags::MTIM)
        .unwrap();
}

#[test]
fn path_stat_readlink_and_set_times() {
    let (dir, ctx, fd) = sandbox();
    fs::write(dir.path().join("a"), b"abc").unwrap();

    let stat = ctx
        .path_filestat_get(fd, LookupFlags::SYMLINK_FOLLOW, "a")
        .unwrap();
    assert_eq!(stat.size, 3);
    assert_eq!(stat.filetype, FileType::RegularFile);

    ctx.path_symlink("a", fd, "lnk").unwrap();
    let no_follow = ctx
        .path_filestat_get(fd, LookupFlags::empty(), "lnk")
        .unwrap();
    assert_eq!(no_follow.filetype, FileType::SymbolicLink);
    let follow = ctx
        .path_filestat_get(fd, LookupFlags::SYMLINK_FOLLOW, "lnk")
        .unwrap();
    assert_eq!(follow.filetype, FileType::RegularFile);

    // A target that exactly fills the buffer is out of range.
    let mut tiny = [0u8; 1];
    assert_eq!(ctx.path_readlink(fd, "lnk", &mut tiny), Err(Errno::Range));
    let mut buf = [0u8; 16];
    let n = ctx.path_readlink(fd, "lnk", &mut buf).unwrap();
    assert_eq!(&buf[..n as usize], b"a");

    ctx.path_filestat_set_times(
        fd,
        LookupFlags::SYMLINK_FOLLOW,
        "a",
        5_000_000_000,
        7_000_000_000,
        FstFlags::ATIM | FstFlags::MTIM,
    )
    .unwrap();
    let stat = ctx
        .path_filestat_get(fd, LookupFlags::SYMLINK_FOLLOW, "a")
        .unwrap();
    assert_eq!(stat.atim, 5_000_000_000);
    assert_eq!(stat.mtim, 7_000_000_000);
}

#[test]
fn directory_create_open_remove() {
    let (_dir, mut ctx, fd) = sandbox();
    ctx.path_create_directory(fd, "sub").unwrap();

    let sub = ctx
        .path_open(
            fd,
            LookupFlags::SYMLINK_FOLLOW,
            "sub",
            OpenFlags::DIRECTORY,
            Rights::FD_READDIR | Rights::FD_SEEK,
            Rights::empty(),
            FdFlags::empty(),
        )
        .unwrap();
    let stat = ctx.fd_fdstat_get(sub).unwrap();
    assert_eq!(stat.file_type, FileType::Directory);
    // Directories lose the seek right on the way in.
    assert!(stat.rights_base.contains(Rights::FD_READDIR));
    assert!(!stat.rights_base.contains(Rights::FD_SEEK));

    ctx.fd_close(sub).unwrap();
    ctx.path_remove_directory(fd, "sub").unwrap();
    assert_eq!(
        ctx.path_filestat_get(fd, LookupFlags::SYMLINK_FOLLOW, "sub"),
        Err(Errno::Noent)
    );
}

#[test]
fn rename_link_unlink() {
    let (dir, ctx, fd) = sandbox();
    fs::write(dir.path().join("r1"), b"payload").unwrap();

    ctx.path_rename(fd, "r1", fd, "r2").unwrap();
    assert_eq!(
        ctx.path_filestat_get(fd, LookupFlags::SYMLINK_FOLLOW, "r1"),
        Err(Errno::Noent)
    );

    ctx.path_link(fd, LookupFlags::SYMLINK_FOLLOW, "r2", fd, "r3")
        .unwrap();
    let stat = ctx
        .path_filestat_get(fd, LookupFlags::SYMLINK_FOLLOW, "r2")
        .unwrap();
    assert_eq!(stat.nlink, 2);

    ctx.path_unlink_file(fd, "r3").unwrap();
    assert_eq!(ctx.path_unlink_file(fd, "r3"), Err(Errno::Noent));
    assert_eq!(ctx.path_remove_directory(fd, "r2"), Err(Errno::Notdir));
}

#[test]
fn open_truncate_requires_the_size_right() {
    let (dir, mut ctx, _fd) = sandbox();
    fs::write(dir.path().join("t.txt"), b"content").unwrap();

    // A second pre-open of the same directory, without the size right.
    let restricted = ctx.preopen(
        open_dir(dir.path()),
        dir.path().to_str().unwrap(),
        FdStat {
            rights_base: Rights::ALL & !Rights::PATH_FILESTAT_SET_SIZE,
            ..dir_stat()
        },
    );
    let err = ctx
        .path_open(
            restricted,
            LookupFlags::SYMLINK_FOLLOW,
            "t.txt",
            OpenFlags::TRUNC,
            Rights::FD_WRITE,
            Rights::empty(),
            FdFlags::empty(),
        )
        .unwrap_err();
    assert_eq!(err, Errno::Notcapable);

    // And creation requires the create right.
    let no_create = ctx.preopen(
        open_dir(dir.path()),
        dir.path().to_str().unwrap(),
        FdStat {
            rights_base: Rights::ALL & !Rights::PATH_CREATE_FILE,
            ..dir_stat()
        },
    );
    let err = ctx
        .path_open(
            no_create,
            LookupFlags::SYMLINK_FOLLOW,
            "fresh.txt",
            OpenFlags::CREAT,
            Rights::FD_WRITE,
            Rights::empty(),
            FdFlags::empty(),
        )
        .unwrap_err();
    assert_eq!(err, Errno::Notcapable);
}

#[test]
fn rsync_open_flag_is_unsupported() {
    let (_dir, mut ctx, fd) = sandbox();
    let err = ctx
        .path_open(
            fd,
            LookupFlags::SYMLINK_FOLLOW,
            "x",
            OpenFlags::CREAT,
            Rights::FD_WRITE,
            Rights::empty(),
            FdFlags::RSYNC,
        )
        .unwrap_err();
    assert_eq!(err, Errno::Nosys);
}

fn names(entries: &[DirEntry]) -> Vec<&str> {
    entries.iter().map(|e| e.name.as_str()).collect()
}

#[test]
fn readdir_resumes_from_cookies() {
    let (dir, mut ctx, fd) = sandbox();
    fs::write(dir.path().join("a"), b"1").unwrap();
    fs::write(dir.path().join("b"), b"2").unwrap();

    // A one-byte buffer limit still yields exactly one entry.
    let first = ctx.fd_readdir(fd, 1, 0).unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].next, 1);

    let rest = ctx.fd_readdir(fd, 1 << 16, first[0].next).unwrap();
    assert_eq!(rest.len(), 3);

    let full = ctx.fd_readdir(fd, 1 << 16, 0).unwrap();
    assert_eq!(full.len(), 4);
    for (index, entry) in full.iter().enumerate() {
        assert_eq!(entry.next, index as u64 + 1);
    }

    // Synthetic entries come last, in order, exactly once per restart.
    assert_eq!(&names(&full)[2..], &[".", ".."]);
    let mut host_names = names(&full)[..2].to_vec();
    host_names.sort();
    assert_eq!(host_names, ["a", "b"]);

    // Resumption is an order-preserving suffix of the full listing.
    assert_eq!(names(&rest), &names(&full)[1..]);

    assert_eq!(ctx.fd_readdir(fd, 64, u64::MAX), Err(Errno::Inval));
}

#[test]
fn readdir_needs_a_directory_and_the_right() {
    let (dir, mut ctx, fd) = sandbox();
    fs::write(dir.path().join("plain"), b"x").unwrap();

    let file = open_with(&mut ctx, fd, "plain", Rights::FD_READ | Rights::FD_READDIR);
    assert_eq!(ctx.fd_readdir(file, 1 << 16, 0), Err(Errno::Notdir));

    let restricted = open_with(&mut ctx, fd, "plain", Rights::FD_READ);
    assert_eq!(ctx.fd_readdir(restricted, 1 << 16, 0), Err(Errno::Notcapable));
}

#[test]
fn renumber_moves_and_evicts() {
    let (dir, mut ctx, fd) = sandbox();
    fs::write(dir.path().join("a"), b"AAA").unwrap();
    fs::write(dir.path().join("b"), b"BBB").unwrap();

    let fa = open_with(&mut ctx, fd, "a", Rights::FD_READ);
    let fb = open_with(&mut ctx, fd, "b", Rights::FD_READ);
    assert_eq!((fa, fb), (1, 2));

    ctx.fd_renumber(fa, fb).unwrap();
    assert_eq!(ctx.fd_fdstat_get(fa), Err(Errno::Badf));

    let mut buf = [0u8; 3];
    ctx.fd_read(fb, &mut [IoSliceMut::new(&mut buf)]).unwrap();
    assert_eq!(&buf, b"AAA");

    // The vacated slot is the next one handed out.
    let fc = open_with(&mut ctx, fd, "b", Rights::FD_READ);
    assert_eq!(fc, 1);

    // Pre-opens stay where they are.
    assert_eq!(ctx.fd_renumber(fd, 7), Err(Errno::Notsup));
    assert_eq!(ctx.fd_renumber(fb, fd), Err(Errno::Notsup));
    assert_eq!(ctx.fd_renumber(42, 43), Err(Errno::Badf));
}

#[test]
fn stdio_stat_is_masked() {
    let mut ctx = WasiCtx::builder().build();
    ctx.inherit_stdio().unwrap();

    for fd in 0..3 {
        assert_eq!(
            ctx.fd_fdstat_get(fd).unwrap().file_type,
            FileType::CharacterDevice
        );
        let stat = ctx.fd_filestat_get(fd).unwrap();
        assert_eq!(stat.size, 0);
        assert_eq!((stat.atim, stat.mtim, stat.ctim), (0, 0, 0));
    }
    // Stdio pre-opens are not directories.
    assert_eq!(ctx.fd_prestat_get(1), Err(Errno::Notdir));
}

#[test]
fn args_and_environ_are_frozen() {
    let ctx = WasiCtx::builder()
        .args(["prog", "--flag"])
        .envs(["A=1", "B=2"])
        .build();
    let args: Vec<&str> = ctx.args_get().unwrap().iter().map(String::as_str).collect();
    assert_eq!(args, ["prog", "--flag"]);
    let env: Vec<&str> = ctx.environ_get().unwrap().iter().map(String::as_str).collect();
    assert_eq!(env, ["A=1", "B=2"]);
}

#[test]
fn close_drains_everything() {
    let (dir, mut ctx, fd) = sandbox();
    fs::write(dir.path().join("a"), b"1").unwrap();
    let file = open_with(&mut ctx, fd, "a", Rights::FD_READ);

    ctx.close();
    assert_eq!(ctx.fd_fdstat_get(fd), Err(Errno::Badf));
    assert_eq!(ctx.fd_fdstat_get(file), Err(Errno::Badf));
}
