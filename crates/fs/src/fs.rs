// Copyright 2025 the sfs authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The pass-through filesystem.
//!
//! Every callback resolves the mount-relative path through the inode table,
//! mirrors the operation onto the backing root, and reports successful
//! mutations to the change-capture pipeline. Data reads and writes go
//! through raw file handles; writes additionally feed the batch byte
//! counter.

use std::{
    collections::HashMap,
    ffi::{CString, OsStr, OsString},
    fs::{self, File, OpenOptions, Permissions},
    io,
    os::unix::{
        ffi::OsStrExt,
        fs::{DirEntryExt, FileExt, MetadataExt, OpenOptionsExt, PermissionsExt},
    },
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, SystemTime},
};

use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, ReplyXattr,
    Request, TimeOrNow,
};
use tracing::{debug, error, info, warn};

use crate::{
    SfsState,
    classify::Operation,
    creds::AccessGuard,
    inode::InodeTable,
    mtime::{self, apply_update_mtime, mtime_would_regress},
};

/// Kernel cache validity for entries and attributes, matching the host
/// runtime's defaults for a pass-through mount.
const TTL: Duration = Duration::from_secs(1);

struct OpenFile {
    file:        File,
    wants_write: bool,
}

struct OpenDir {
    entries: Vec<(u64, FileType, OsString)>,
}

/// Pass-through filesystem over a backing root directory.
pub struct SfsFilesystem {
    root:       PathBuf,
    state:      Arc<SfsState>,
    creds:      AccessGuard,
    inodes:     InodeTable,
    files:      HashMap<u64, OpenFile>,
    dirs:       HashMap<u64, OpenDir>,
    next_fh:    u64,
    opened_fds: i64,
}

impl SfsFilesystem {
    #[must_use]
    pub fn new(root: PathBuf, state: Arc<SfsState>, perm_checks: bool) -> Self {
        Self {
            root,
            state,
            creds: AccessGuard::new(perm_checks),
            inodes: InodeTable::new(),
            files: HashMap::new(),
            dirs: HashMap::new(),
            next_fh: 1,
            opened_fds: 0,
        }
    }

    fn rel_of(&self, ino: u64) -> Result<String, libc::c_int> {
        self.inodes
            .path_of(ino)
            .map(str::to_string)
            .ok_or(libc::ENOENT)
    }

    fn rel_child(&self, parent: u64, name: &OsStr) -> Result<String, libc::c_int> {
        let parent = self.rel_of(parent)?;
        let name = name.to_str().ok_or(libc::EINVAL)?;
        Ok(InodeTable::child_path(&parent, name))
    }

    /// Backing path under the root for a mount-relative path.
    fn full_path(&self, rel: &str) -> PathBuf {
        if rel == "/" {
            self.root.clone()
        } else {
            self.root.join(&rel[1..])
        }
    }

    fn c_path(&self, rel: &str) -> Result<CString, libc::c_int> {
        CString::new(self.full_path(rel).into_os_string().as_bytes()).map_err(|_| libc::EINVAL)
    }

    /// Assign an inode for the path (bumping its kernel lookup count) and
    /// reply with a directory entry built from `md`.
    fn reply_entry_for(&mut self, rel: &str, md: io::Result<fs::Metadata>, reply: ReplyEntry) {
        match md {
            Ok(md) => {
                let ino = self.inodes.assign(rel);
                reply.entry(&TTL, &attr_from(&md, ino), 0);
            }
            Err(e) => reply.error(errno_of(&e)),
        }
    }

    fn take_fh(&mut self) -> u64 {
        let fh = self.next_fh;
        self.next_fh += 1;
        fh
    }

    fn count_open(&mut self, domain: &str, delta: i64) {
        self.opened_fds += delta;
        debug!(domain, opened_fds = self.opened_fds);
    }
}

fn errno_of(e: &io::Error) -> libc::c_int { e.raw_os_error().unwrap_or(libc::EIO) }

fn kind_of_mode(mode: u32) -> FileType {
    match mode & libc::S_IFMT {
        libc::S_IFDIR => FileType::Directory,
        libc::S_IFLNK => FileType::Symlink,
        libc::S_IFCHR => FileType::CharDevice,
        libc::S_IFBLK => FileType::BlockDevice,
        libc::S_IFIFO => FileType::NamedPipe,
        libc::S_IFSOCK => FileType::Socket,
        _ => FileType::RegularFile,
    }
}

fn kind_of_file_type(ft: fs::FileType) -> FileType {
    use std::os::unix::fs::FileTypeExt;
    if ft.is_dir() {
        FileType::Directory
    } else if ft.is_symlink() {
        FileType::Symlink
    } else if ft.is_char_device() {
        FileType::CharDevice
    } else if ft.is_block_device() {
        FileType::BlockDevice
    } else if ft.is_fifo() {
        FileType::NamedPipe
    } else if ft.is_socket() {
        FileType::Socket
    } else {
        FileType::RegularFile
    }
}

fn systime(sec: i64, nsec: i64) -> SystemTime {
    if sec >= 0 {
        SystemTime::UNIX_EPOCH + Duration::new(sec as u64, nsec as u32)
    } else {
        SystemTime::UNIX_EPOCH - Duration::from_secs(sec.unsigned_abs())
    }
}

fn attr_from(md: &fs::Metadata, ino: u64) -> FileAttr {
    FileAttr {
        ino,
        size: md.size(),
        blocks: md.blocks(),
        atime: systime(md.atime(), md.atime_nsec()),
        mtime: systime(md.mtime(), md.mtime_nsec()),
        ctime: systime(md.ctime(), md.ctime_nsec()),
        crtime: SystemTime::UNIX_EPOCH,
        kind: kind_of_mode(md.mode()),
        perm: (md.mode() & 0o7777) as u16,
        nlink: md.nlink() as u32,
        uid: md.uid(),
        gid: md.gid(),
        rdev: md.rdev() as u32,
        blksize: md.blksize() as u32,
        flags: 0,
    }
}

fn open_with_flags(path: &Path, flags: i32, create_mode: Option<u32>) -> io::Result<File> {
    let acc = flags & libc::O_ACCMODE;
    let mut options = OpenOptions::new();
    options.read(acc == libc::O_RDONLY || acc == libc::O_RDWR);
    options.write(acc == libc::O_WRONLY || acc == libc::O_RDWR);
    if let Some(mode) = create_mode {
        options.create(true).mode(mode);
    }
    options.custom_flags(flags & !(libc::O_ACCMODE | libc::O_CREAT | libc::O_EXCL));
    options.open(path)
}

macro_rules! try_reply {
    ($reply:expr, $expr:expr) => {
        match $expr {
            Ok(value) => value,
            Err(errno) => {
                $reply.error(errno);
                return;
            }
        }
    };
}

macro_rules! begin_perm {
    ($self:expr, $req:expr, $reply:expr) => {
        try_reply!($reply, $self.creds.begin($req.uid(), $req.gid()))
    };
}

impl Filesystem for SfsFilesystem {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), libc::c_int> {
        info!(root = ?self.root, "filesystem mounted");
        Ok(())
    }

    fn destroy(&mut self) {
        // Other threads may still touch shared state; nothing to tear down
        // here. Staging residue is recovered on next boot.
    }

    fn lookup(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let rel = try_reply!(reply, self.rel_child(parent, name));
        let full = self.full_path(&rel);
        let md = {
            let _scope = begin_perm!(self, req, reply);
            fs::symlink_metadata(full)
        };
        self.reply_entry_for(&rel, md, reply);
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        self.inodes.forget(ino, nlookup);
    }

    fn getattr(&mut self, req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        let rel = try_reply!(reply, self.rel_of(ino));
        let _scope = begin_perm!(self, req, reply);
        match fs::symlink_metadata(self.full_path(&rel)) {
            Ok(md) => reply.attr(&TTL, &attr_from(&md, ino)),
            Err(e) => reply.error(errno_of(&e)),
        }
    }

    #[allow(clippy::too_many_lines)]
    fn setattr(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let rel = try_reply!(reply, self.rel_of(ino));
        let full = self.full_path(&rel);
        let settings = self.state.config().current();

        // Each backing syscall gets its own credential scope so the events
        // are batched after the switch is undone; the access lock is never
        // held together with the batch lock.
        if let Some(mode) = mode {
            let result = {
                let _scope = begin_perm!(self, req, reply);
                fs::set_permissions(&full, Permissions::from_mode(mode))
            };
            if let Err(e) = result {
                reply.error(errno_of(&e));
                return;
            }
            apply_update_mtime(settings.update_mtime, "chmod", &full);
            self.state.record_mutation(&Operation::Chmod, &rel);
        }

        if uid.is_some() || gid.is_some() {
            let c_path = try_reply!(reply, self.c_path(&rel));
            let result = {
                let _scope = begin_perm!(self, req, reply);
                // A missing id leaves the corresponding owner untouched.
                // SAFETY: c_path is NUL-terminated; ids are plain integers.
                let rc = unsafe {
                    libc::chown(
                        c_path.as_ptr(),
                        uid.unwrap_or(u32::MAX),
                        gid.unwrap_or(u32::MAX),
                    )
                };
                if rc < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(())
                }
            };
            if let Err(e) = result {
                reply.error(errno_of(&e));
                return;
            }
            apply_update_mtime(settings.update_mtime, "chown", &full);
            self.state.record_mutation(&Operation::Chown, &rel);
        }

        if let Some(size) = size {
            let truncated = if let Some(open) = fh.and_then(|fh| self.files.get(&fh)) {
                open.file.set_len(size).map_err(|e| errno_of(&e))
            } else {
                self.c_path(&rel).and_then(|c_path| {
                    let _scope = self.creds.begin(req.uid(), req.gid())?;
                    // SAFETY: c_path is NUL-terminated.
                    let rc = unsafe { libc::truncate(c_path.as_ptr(), size as libc::off_t) };
                    if rc < 0 {
                        Err(errno_of(&io::Error::last_os_error()))
                    } else {
                        Ok(())
                    }
                })
            };
            if let Err(errno) = truncated {
                reply.error(errno);
                return;
            }
            // Truncation through an open handle is reported by the
            // write-bearing release, like any other data change.
            if fh.is_none() {
                self.state.record_mutation(&Operation::Truncate, &rel);
            }
        }

        if atime.is_some() || mtime.is_some() {
            let result: Result<(), libc::c_int> = {
                let _scope = begin_perm!(self, req, reply);

                let regresses = if settings.forbid_older_mtime
                    && let Some(TimeOrNow::SpecificTime(requested)) = mtime
                {
                    match mtime_would_regress(&full, requested) {
                        Ok(regresses) => regresses,
                        Err(e) => {
                            error!(path = ?full, error = %e, "cannot stat to forbid older mtime");
                            false
                        }
                    }
                } else {
                    false
                };

                if regresses {
                    Err(libc::EPERM)
                } else {
                    let spec = |t: Option<TimeOrNow>| match t {
                        None => mtime::OMIT,
                        Some(TimeOrNow::Now) => mtime::NOW,
                        Some(TimeOrNow::SpecificTime(time)) => mtime::timespec_of(time),
                    };
                    // utime/utimes follow symlinks; operate on the link
                    // itself.
                    mtime::set_times(
                        &full,
                        [spec(atime), spec(mtime)],
                        libc::AT_SYMLINK_NOFOLLOW,
                    )
                    .map_err(|e| errno_of(&e))
                }
            };
            if let Err(errno) = result {
                reply.error(errno);
                return;
            }
            self.state.record_mutation(&Operation::Utimens, &rel);
        }

        match fs::symlink_metadata(&full) {
            Ok(md) => reply.attr(&TTL, &attr_from(&md, ino)),
            Err(e) => reply.error(errno_of(&e)),
        }
    }

    fn readlink(&mut self, req: &Request<'_>, ino: u64, reply: ReplyData) {
        let rel = try_reply!(reply, self.rel_of(ino));
        let _scope = begin_perm!(self, req, reply);
        match fs::read_link(self.full_path(&rel)) {
            Ok(target) => reply.data(target.as_os_str().as_bytes()),
            Err(e) => reply.error(errno_of(&e)),
        }
    }

    fn mknod(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        rdev: u32,
        reply: ReplyEntry,
    ) {
        let rel = try_reply!(reply, self.rel_child(parent, name));
        let c_path = try_reply!(reply, self.c_path(&rel));

        let result = {
            let _scope = begin_perm!(self, req, reply);
            // SAFETY: c_path is NUL-terminated; mode and rdev are plain
            // integers.
            let rc = unsafe {
                libc::mknod(
                    c_path.as_ptr(),
                    (mode & !umask) as libc::mode_t,
                    libc::dev_t::from(rdev),
                )
            };
            if rc < 0 {
                Err(io::Error::last_os_error())
            } else {
                Ok(())
            }
        };
        if let Err(e) = result {
            reply.error(errno_of(&e));
            return;
        }

        self.state.record_mutation(&Operation::Mknod, &rel);
        let md = fs::symlink_metadata(self.full_path(&rel));
        self.reply_entry_for(&rel, md, reply);
    }

    fn mkdir(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: ReplyEntry,
    ) {
        let rel = try_reply!(reply, self.rel_child(parent, name));
        let c_path = try_reply!(reply, self.c_path(&rel));

        let result = {
            let _scope = begin_perm!(self, req, reply);
            // SAFETY: c_path is NUL-terminated.
            let rc = unsafe { libc::mkdir(c_path.as_ptr(), (mode & !umask) as libc::mode_t) };
            if rc < 0 {
                Err(io::Error::last_os_error())
            } else {
                Ok(())
            }
        };
        if let Err(e) = result {
            reply.error(errno_of(&e));
            return;
        }

        self.state.record_mutation(&Operation::Mkdir, &rel);
        let md = fs::symlink_metadata(self.full_path(&rel));
        self.reply_entry_for(&rel, md, reply);
    }

    fn unlink(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let rel = try_reply!(reply, self.rel_child(parent, name));
        let result = {
            let _scope = begin_perm!(self, req, reply);
            fs::remove_file(self.full_path(&rel))
        };
        match result {
            Ok(()) => {
                self.state.record_mutation(&Operation::Unlink, &rel);
                reply.ok();
            }
            Err(e) => reply.error(errno_of(&e)),
        }
    }

    fn rmdir(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let rel = try_reply!(reply, self.rel_child(parent, name));
        let result = {
            let _scope = begin_perm!(self, req, reply);
            fs::remove_dir(self.full_path(&rel))
        };
        match result {
            Ok(()) => {
                self.state.record_mutation(&Operation::Rmdir, &rel);
                reply.ok();
            }
            Err(e) => reply.error(errno_of(&e)),
        }
    }

    fn symlink(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        let rel = try_reply!(reply, self.rel_child(parent, link_name));
        let result = {
            let _scope = begin_perm!(self, req, reply);
            std::os::unix::fs::symlink(target, self.full_path(&rel))
        };
        if let Err(e) = result {
            reply.error(errno_of(&e));
            return;
        }

        self.state.record_mutation(&Operation::Symlink, &rel);
        let md = fs::symlink_metadata(self.full_path(&rel));
        self.reply_entry_for(&rel, md, reply);
    }

    fn rename(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        if flags != 0 {
            reply.error(libc::EINVAL);
            return;
        }
        let rel = try_reply!(reply, self.rel_child(parent, name));
        let new_rel = try_reply!(reply, self.rel_child(newparent, newname));
        let full = self.full_path(&rel);

        let source_is_dir = fs::symlink_metadata(&full).is_ok_and(|md| md.is_dir());

        let result = {
            let _scope = begin_perm!(self, req, reply);
            fs::rename(&full, self.full_path(&new_rel))
        };
        match result {
            Ok(()) => {
                self.inodes.rename(&rel, &new_rel);
                self.state.record_mutation(
                    &Operation::Rename {
                        new_path: &new_rel,
                        source_is_dir,
                    },
                    &rel,
                );
                reply.ok();
            }
            Err(e) => reply.error(errno_of(&e)),
        }
    }

    fn link(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        let rel = try_reply!(reply, self.rel_of(ino));
        let new_rel = try_reply!(reply, self.rel_child(newparent, newname));
        let result = {
            let _scope = begin_perm!(self, req, reply);
            fs::hard_link(self.full_path(&rel), self.full_path(&new_rel))
        };
        if let Err(e) = result {
            reply.error(errno_of(&e));
            return;
        }

        self.state.record_mutation(&Operation::Link, &new_rel);
        let md = fs::symlink_metadata(self.full_path(&new_rel));
        self.reply_entry_for(&new_rel, md, reply);
    }

    fn open(&mut self, req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let rel = try_reply!(reply, self.rel_of(ino));
        let result = {
            let _scope = begin_perm!(self, req, reply);
            open_with_flags(&self.full_path(&rel), flags, None)
        };
        match result {
            Ok(file) => {
                let wants_write = (flags & libc::O_ACCMODE) != libc::O_RDONLY;
                let fh = self.take_fh();
                self.files.insert(fh, OpenFile { file, wants_write });
                self.count_open("open", 1);
                reply.opened(fh, 0);
            }
            Err(e) => reply.error(errno_of(&e)),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(open) = self.files.get(&fh) else {
            reply.error(libc::EBADF);
            return;
        };

        let mut buf = vec![0_u8; size as usize];
        let mut filled = 0_usize;
        // Short reads are only surfaced at EOF; the kernel substitutes
        // zeroes otherwise.
        while filled < buf.len() {
            match open.file.read_at(&mut buf[filled..], offset as u64 + filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    reply.error(errno_of(&e));
                    return;
                }
            }
        }
        reply.data(&buf[..filled]);
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Some(open) = self.files.get(&fh) else {
            reply.error(libc::EBADF);
            return;
        };

        match open.file.write_all_at(data, offset as u64) {
            Ok(()) => {
                self.state.note_bytes(data.len() as u64);
                reply.written(data.len() as u32);
            }
            Err(e) => reply.error(errno_of(&e)),
        }
    }

    fn flush(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _fh: u64,
        _lock_owner: u64,
        reply: ReplyEmpty,
    ) {
        // Not an fsync; nothing is cached on this side.
        reply.ok();
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        let Some(open) = self.files.remove(&fh) else {
            reply.error(libc::EBADF);
            return;
        };
        let wants_write = open.wants_write;
        drop(open);
        self.count_open("close", -1);

        if wants_write && let Ok(rel) = self.rel_of(ino) {
            self.state.record_mutation(&Operation::WriteClose, &rel);
        }
        reply.ok();
    }

    fn fsync(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        datasync: bool,
        reply: ReplyEmpty,
    ) {
        let Some(open) = self.files.get(&fh) else {
            reply.error(libc::EBADF);
            return;
        };
        let result = if datasync {
            open.file.sync_data()
        } else {
            open.file.sync_all()
        };
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno_of(&e)),
        }
    }

    fn opendir(&mut self, req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let rel = try_reply!(reply, self.rel_of(ino));
        let snapshot = {
            let _scope = begin_perm!(self, req, reply);
            read_dir_snapshot(&self.full_path(&rel), ino)
        };
        match snapshot {
            Ok(entries) => {
                let fh = self.take_fh();
                self.dirs.insert(fh, OpenDir { entries });
                self.count_open("opendir", 1);
                reply.opened(fh, 0);
            }
            Err(e) => reply.error(errno_of(&e)),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(dir) = self.dirs.get(&fh) else {
            reply.error(libc::EBADF);
            return;
        };

        for (i, (ino, kind, name)) in dir.entries.iter().enumerate().skip(offset as usize) {
            if reply.add(*ino, (i + 1) as i64, *kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, _flags: i32, reply: ReplyEmpty) {
        if self.dirs.remove(&fh).is_none() {
            reply.error(libc::EBADF);
            return;
        }
        self.count_open("closedir", -1);
        reply.ok();
    }

    fn fsyncdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        datasync: bool,
        reply: ReplyEmpty,
    ) {
        let rel = try_reply!(reply, self.rel_of(ino));
        let result = File::open(self.full_path(&rel)).and_then(|dir| {
            if datasync {
                dir.sync_data()
            } else {
                dir.sync_all()
            }
        });
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno_of(&e)),
        }
    }

    fn statfs(&mut self, req: &Request<'_>, ino: u64, reply: ReplyStatfs) {
        let rel = try_reply!(reply, self.rel_of(ino));
        let c_path = try_reply!(reply, self.c_path(&rel));

        // SAFETY: an all-zero statvfs is a valid out-parameter.
        let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
        let result = {
            let _scope = begin_perm!(self, req, reply);
            // SAFETY: c_path is NUL-terminated and stat is a valid statvfs
            // out-parameter.
            let rc = unsafe { libc::statvfs(c_path.as_ptr(), &raw mut stat) };
            if rc < 0 {
                Err(io::Error::last_os_error())
            } else {
                Ok(())
            }
        };
        if let Err(e) = result {
            reply.error(errno_of(&e));
            return;
        }

        reply.statfs(
            stat.f_blocks,
            stat.f_bfree,
            stat.f_bavail,
            stat.f_files,
            stat.f_ffree,
            stat.f_bsize as u32,
            stat.f_namemax as u32,
            stat.f_frsize as u32,
        );
    }

    fn setxattr(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        name: &OsStr,
        value: &[u8],
        flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        let rel = try_reply!(reply, self.rel_of(ino));
        let c_path = try_reply!(reply, self.c_path(&rel));
        let c_name = try_reply!(reply, CString::new(name.as_bytes()).map_err(|_| libc::EINVAL));

        let result = {
            let _scope = begin_perm!(self, req, reply);
            // SAFETY: all pointers reference live NUL-terminated strings or
            // the value slice with its exact length.
            let rc = unsafe {
                libc::lsetxattr(
                    c_path.as_ptr(),
                    c_name.as_ptr(),
                    value.as_ptr().cast(),
                    value.len(),
                    flags,
                )
            };
            if rc < 0 {
                Err(io::Error::last_os_error())
            } else {
                Ok(())
            }
        };
        if let Err(e) = result {
            reply.error(errno_of(&e));
            return;
        }

        self.state.record_mutation(&Operation::SetXattr, &rel);
        reply.ok();
    }

    fn getxattr(&mut self, req: &Request<'_>, ino: u64, name: &OsStr, size: u32, reply: ReplyXattr) {
        let rel = try_reply!(reply, self.rel_of(ino));
        let c_path = try_reply!(reply, self.c_path(&rel));
        let c_name = try_reply!(reply, CString::new(name.as_bytes()).map_err(|_| libc::EINVAL));

        let _scope = begin_perm!(self, req, reply);
        let mut buf = vec![0_u8; size as usize];
        // SAFETY: buf is valid for buf.len() bytes; a zero size queries the
        // attribute length without writing.
        let len = unsafe {
            libc::lgetxattr(
                c_path.as_ptr(),
                c_name.as_ptr(),
                buf.as_mut_ptr().cast(),
                buf.len(),
            )
        };
        if len < 0 {
            reply.error(errno_of(&io::Error::last_os_error()));
        } else if size == 0 {
            reply.size(len as u32);
        } else {
            reply.data(&buf[..len as usize]);
        }
    }

    fn listxattr(&mut self, req: &Request<'_>, ino: u64, size: u32, reply: ReplyXattr) {
        let rel = try_reply!(reply, self.rel_of(ino));
        let c_path = try_reply!(reply, self.c_path(&rel));

        let _scope = begin_perm!(self, req, reply);
        let mut buf = vec![0_u8; size as usize];
        // SAFETY: buf is valid for buf.len() bytes; a zero size queries the
        // list length without writing.
        let len = unsafe { libc::llistxattr(c_path.as_ptr(), buf.as_mut_ptr().cast(), buf.len()) };
        if len < 0 {
            reply.error(errno_of(&io::Error::last_os_error()));
        } else if size == 0 {
            reply.size(len as u32);
        } else {
            reply.data(&buf[..len as usize]);
        }
    }

    fn removexattr(&mut self, req: &Request<'_>, ino: u64, name: &OsStr, reply: ReplyEmpty) {
        let rel = try_reply!(reply, self.rel_of(ino));
        let c_path = try_reply!(reply, self.c_path(&rel));
        let c_name = try_reply!(reply, CString::new(name.as_bytes()).map_err(|_| libc::EINVAL));

        let result = {
            let _scope = begin_perm!(self, req, reply);
            // SAFETY: both pointers reference live NUL-terminated strings.
            let rc = unsafe { libc::lremovexattr(c_path.as_ptr(), c_name.as_ptr()) };
            if rc < 0 {
                Err(io::Error::last_os_error())
            } else {
                Ok(())
            }
        };
        if let Err(e) = result {
            reply.error(errno_of(&e));
            return;
        }

        self.state.record_mutation(&Operation::RemoveXattr, &rel);
        reply.ok();
    }

    fn access(&mut self, req: &Request<'_>, ino: u64, mask: i32, reply: ReplyEmpty) {
        let rel = try_reply!(reply, self.rel_of(ino));
        let c_path = try_reply!(reply, self.c_path(&rel));

        let result = {
            let _scope = begin_perm!(self, req, reply);
            // SAFETY: c_path is NUL-terminated. AT_EACCESS checks against
            // the effective (switched) credentials.
            let rc =
                unsafe { libc::faccessat(libc::AT_FDCWD, c_path.as_ptr(), mask, libc::AT_EACCESS) };
            if rc < 0 {
                Err(io::Error::last_os_error())
            } else {
                Ok(())
            }
        };
        if let Err(e) = result {
            reply.error(errno_of(&e));
            return;
        }
        reply.ok();
    }

    fn create(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let rel = try_reply!(reply, self.rel_child(parent, name));
        let full = self.full_path(&rel);

        let result = {
            let _scope = begin_perm!(self, req, reply);
            open_with_flags(&full, flags, Some(mode & !umask))
        };
        let file = match result {
            Ok(file) => file,
            Err(e) => {
                reply.error(errno_of(&e));
                return;
            }
        };

        let md = match fs::symlink_metadata(&full) {
            Ok(md) => md,
            Err(e) => {
                reply.error(errno_of(&e));
                return;
            }
        };

        let wants_write = (flags & libc::O_ACCMODE) != libc::O_RDONLY;
        let fh = self.take_fh();
        self.files.insert(fh, OpenFile { file, wants_write });
        self.count_open("creat", 1);

        // No event here: the write-bearing release covers the new file.
        let ino = self.inodes.assign(&rel);
        reply.created(&TTL, &attr_from(&md, ino), 0, fh, 0);
    }
}

fn read_dir_snapshot(path: &Path, dir_ino: u64) -> io::Result<Vec<(u64, FileType, OsString)>> {
    let mut entries = vec![
        (dir_ino, FileType::Directory, OsString::from(".")),
        (dir_ino, FileType::Directory, OsString::from("..")),
    ];
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let kind = entry.file_type().map(kind_of_file_type).unwrap_or_else(|e| {
            warn!(path = ?entry.path(), error = %e, "cannot stat directory entry");
            FileType::RegularFile
        });
        entries.push((entry.ino(), kind, entry.file_name()));
    }
    Ok(entries)
}
