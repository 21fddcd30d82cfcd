//! On-disk repository metadata manager
//!
//! [`DotDir`] owns the hidden metadata directory of a repository and
//! exposes every operation a higher layer needs over it: directory
//! scaffolding, pack and loose-object enumeration, reference reads and
//! CAS writes, packed-refs reconciliation, and ref packing.
//!
//! ## Loose vs packed references
//!
//! A reference lives either as an individual file under `refs/` (or as
//! `HEAD`) or as one line of the `packed-refs` file. Reads consult the
//! loose file first; loose always shadows packed. The packed-refs file
//! is parsed once and cached, keyed on its modification time.
//!
//! ## Concurrency
//!
//! A `DotDir` is single-threaded. Cross-process safety comes from
//! advisory file locks: every writer of `packed-refs` locks it before
//! reading and holds the lock through the final rename, and `set_reference`
//! locks the individual loose file for the duration of its
//! compare-and-set.

use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::refs::ref_name::RefName;
use crate::artifacts::refs::reference::Reference;
use crate::errors::{Error, Result};
use derive_new::new;
use file_guard::Lock;
use std::collections::{HashMap, HashSet};
use std::fs::{File, Metadata, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::ops::DerefMut;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;
use walkdir::WalkDir;

const PACKED_REFS_PATH: &str = "packed-refs";
const CONFIG_PATH: &str = "config";
const INDEX_PATH: &str = "index";
const SHALLOW_PATH: &str = "shallow";
const MODULES_PATH: &str = "modules";
const OBJECTS_PATH: &str = "objects";
const PACK_PATH: &str = "pack";
const INFO_PATH: &str = "info";
const REFS_PATH: &str = "refs";
const HEADS_PATH: &str = "heads";
const TAGS_PATH: &str = "tags";

/// Temp files for atomic packed-refs replacement share this prefix and
/// live in the metadata directory itself; a cross-directory rename is
/// not guaranteed atomic on all filesystems.
const TMP_PACKED_REFS_PREFIX: &str = "._packed-refs";

const PACK_PREFIX: &str = "pack-";
const PACK_EXT: &str = ".pack";
const IDX_EXT: &str = ".idx";

/// Repository metadata directory manager
///
/// Handles all reads and mutations of the on-disk metadata: references,
/// loose objects, packfiles, and the packed-refs file. Not thread-safe;
/// one instance per repository per thread.
#[derive(Debug, new)]
pub struct DotDir {
    /// Path to the metadata directory (typically `.git`)
    path: Box<Path>,
    /// Parsed packed-refs entries, valid as of `packed_refs_last_mod`
    #[new(default)]
    cached_packed_refs: HashMap<RefName, Reference>,
    /// Modification time of packed-refs when the cache was built
    #[new(default)]
    packed_refs_last_mod: Option<SystemTime>,
}

fn is_not_found(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::NotFound
}

impl DotDir {
    /// Open an existing metadata directory.
    ///
    /// # Returns
    ///
    /// The manager, or [`Error::PathNotFound`] when the directory does
    /// not exist.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_dir() {
            return Err(Error::PathNotFound);
        }

        Ok(DotDir::new(path.to_path_buf().into_boxed_path()))
    }

    /// Path to the metadata directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create all the folder scaffolding.
    ///
    /// Idempotent: existing directories are left untouched.
    pub fn initialize(&self) -> Result<()> {
        let must_exist = [
            self.path.join(OBJECTS_PATH).join(INFO_PATH),
            self.path.join(OBJECTS_PATH).join(PACK_PATH),
            self.path.join(REFS_PATH).join(HEADS_PATH),
            self.path.join(REFS_PATH).join(TAGS_PATH),
        ];

        for path in &must_exist {
            std::fs::create_dir_all(path)?;
        }

        debug!(path = %self.path.display(), "initialized metadata directory scaffolding");
        Ok(())
    }

    // ---- opaque metadata files ----

    /// Open the config file for reading.
    pub fn config(&self) -> Result<File> {
        File::open(self.path.join(CONFIG_PATH)).map_err(|err| {
            if is_not_found(&err) {
                Error::ConfigNotFound
            } else {
                err.into()
            }
        })
    }

    /// Open the config file for writing, creating it if absent.
    pub fn config_writer(&self) -> Result<File> {
        Ok(File::create(self.path.join(CONFIG_PATH))?)
    }

    /// Open the staging-area file for reading.
    pub fn index_file(&self) -> Result<File> {
        Ok(File::open(self.path.join(INDEX_PATH))?)
    }

    /// Open the staging-area file for writing, creating it if absent.
    pub fn index_writer(&self) -> Result<File> {
        Ok(File::create(self.path.join(INDEX_PATH))?)
    }

    /// Open the shallow-boundary file for reading, if present.
    pub fn shallow(&self) -> Result<Option<File>> {
        match File::open(self.path.join(SHALLOW_PATH)) {
            Ok(file) => Ok(Some(file)),
            Err(err) if is_not_found(&err) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Open the shallow-boundary file for writing, creating it if absent.
    pub fn shallow_writer(&self) -> Result<File> {
        Ok(File::create(self.path.join(SHALLOW_PATH))?)
    }

    /// A manager for the submodule repository stored under
    /// `modules/<name>`.
    pub fn module(&self, name: &str) -> DotDir {
        DotDir::new(
            self.path
                .join(MODULES_PATH)
                .join(name)
                .into_boxed_path(),
        )
    }

    // ---- packfiles ----

    /// List the hashes of the available packfiles, in no particular
    /// order. A missing pack directory yields an empty list.
    pub fn object_packs(&self) -> Result<Vec<ObjectId>> {
        let pack_dir = self.path.join(OBJECTS_PATH).join(PACK_PATH);
        let entries = match std::fs::read_dir(&pack_dir) {
            Ok(entries) => entries,
            Err(err) if is_not_found(&err) => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut packs = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();

            // pack-<hex>.pack
            let Some(hex) = name
                .strip_prefix(PACK_PREFIX)
                .and_then(|rest| rest.strip_suffix(PACK_EXT))
            else {
                continue;
            };

            if let Ok(hash) = ObjectId::try_parse(hex) {
                packs.push(hash);
            }
        }

        Ok(packs)
    }

    fn object_pack_path(&self, hash: &ObjectId, extension: &str) -> PathBuf {
        self.path
            .join(OBJECTS_PATH)
            .join(PACK_PATH)
            .join(format!("{}{}{}", PACK_PREFIX, hash, extension))
    }

    fn object_pack_open(&self, hash: &ObjectId, extension: &str, missing: Error) -> Result<File> {
        match File::open(self.object_pack_path(hash, extension)) {
            Ok(file) => Ok(file),
            Err(err) if is_not_found(&err) => Err(missing),
            Err(err) => Err(err.into()),
        }
    }

    /// Open the packfile with the given hash.
    pub fn object_pack(&self, hash: &ObjectId) -> Result<File> {
        self.object_pack_open(hash, PACK_EXT, Error::PackfileNotFound)
    }

    /// Open the pack index for the packfile with the given hash.
    pub fn object_pack_idx(&self, hash: &ObjectId) -> Result<File> {
        self.object_pack_open(hash, IDX_EXT, Error::IdxNotFound)
    }

    /// Remove a packfile together with its index.
    pub fn delete_object_pack(&self, hash: &ObjectId) -> Result<()> {
        std::fs::remove_file(self.object_pack_path(hash, PACK_EXT))?;
        std::fs::remove_file(self.object_pack_path(hash, IDX_EXT))?;
        Ok(())
    }

    // ---- loose objects ----

    /// Collect the hashes of all loose objects.
    pub fn objects(&self) -> Result<Vec<ObjectId>> {
        let mut objects = Vec::new();
        self.for_each_object_hash(|hash| {
            objects.push(hash);
            Ok(())
        })?;
        Ok(objects)
    }

    /// Visit the hash of every loose object without materializing the
    /// full list. A missing objects directory yields no visits.
    pub fn for_each_object_hash(&self, mut fun: impl FnMut(ObjectId) -> Result<()>) -> Result<()> {
        let objects_dir = self.path.join(OBJECTS_PATH);
        let entries = match std::fs::read_dir(&objects_dir) {
            Ok(entries) => entries,
            Err(err) if is_not_found(&err) => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        for entry in entries {
            let entry = entry?;
            let prefix = entry.file_name();
            let prefix = prefix.to_string_lossy();

            // fan-out directories are exactly two hex digits
            if !entry.file_type()?.is_dir()
                || prefix.len() != 2
                || !prefix.chars().all(|c| c.is_ascii_hexdigit())
            {
                continue;
            }

            for object in std::fs::read_dir(entry.path())? {
                let object = object?;
                let rest = object.file_name();
                let rest = rest.to_string_lossy();

                if let Ok(hash) = ObjectId::try_parse(&format!("{}{}", prefix, rest)) {
                    fun(hash)?;
                }
            }
        }

        Ok(())
    }

    fn object_path(&self, hash: &ObjectId) -> PathBuf {
        let (dir, file) = hash.to_path_parts();
        self.path.join(OBJECTS_PATH).join(dir).join(file)
    }

    /// Open the loose object file for the given hash.
    pub fn object(&self, hash: &ObjectId) -> Result<File> {
        Ok(File::open(self.object_path(hash))?)
    }

    /// Stat the loose object file for the given hash.
    pub fn object_stat(&self, hash: &ObjectId) -> Result<Metadata> {
        Ok(std::fs::metadata(self.object_path(hash))?)
    }

    /// Remove the loose object file for the given hash.
    pub fn object_delete(&self, hash: &ObjectId) -> Result<()> {
        Ok(std::fs::remove_file(self.object_path(hash))?)
    }

    // ---- references ----

    /// Read a single reference, loose first, then packed.
    ///
    /// # Returns
    ///
    /// The reference, or [`Error::ReferenceNotFound`] when it exists in
    /// neither form.
    pub fn reference(&mut self, name: &RefName) -> Result<Reference> {
        match self.read_reference_file(name) {
            Ok(reference) => Ok(reference),
            Err(Error::Io(err)) if is_not_found(&err) => self.packed_ref(name),
            Err(err) => Err(err),
        }
    }

    /// Follow a symbolic chain until a direct reference is reached.
    ///
    /// A dangling target maps to [`Error::SymRefTargetNotFound`]. Plain
    /// [`DotDir::reference`] never follows chains; that policy belongs to
    /// the caller.
    pub fn resolve_reference(&mut self, reference: &Reference) -> Result<Reference> {
        match reference {
            Reference::Direct { .. } => Ok(reference.clone()),
            Reference::Symbolic { target, .. } => {
                let next = match self.reference(target) {
                    Ok(next) => next,
                    Err(Error::ReferenceNotFound) => return Err(Error::SymRefTargetNotFound),
                    Err(err) => return Err(err),
                };

                self.resolve_reference(&next)
            }
        }
    }

    /// Write a reference, optionally guarded by the previously observed
    /// value.
    ///
    /// With `expected` present this is a compare-and-set: the update
    /// fails with [`Error::ReferenceChangedConcurrently`] if the stored
    /// value no longer matches, and storage is left unchanged.
    ///
    /// # Locking
    ///
    /// An advisory exclusive lock is held on the loose file for the
    /// whole operation and released only on close; unlocking without a
    /// sync would race with concurrent writers.
    pub fn set_reference(&mut self, new: &Reference, expected: Option<&Reference>) -> Result<()> {
        let content = new.to_file_content();
        let path = self.path.join(new.name().to_path());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // truncate on open only when there is no expected value to check
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(expected.is_none())
            .open(&path)?;
        let mut lock = file_guard::lock(&mut file, Lock::Exclusive, 0, 1)?;

        if let Some(expected) = expected {
            let mut current = String::new();
            lock.deref_mut().read_to_string(&mut current)?;

            let current = Reference::from_content(expected.name().clone(), &current);
            let current_oid = match current.oid() {
                Some(oid) if !oid.is_zero() => *oid,
                // an empty or zero-valued loose file defers to packed-refs
                _ => self
                    .packed_ref(expected.name())?
                    .oid()
                    .copied()
                    .unwrap_or_default(),
            };

            if current_oid != expected.oid().copied().unwrap_or_default() {
                return Err(Error::ReferenceChangedConcurrently);
            }

            let handle = lock.deref_mut();
            handle.seek(SeekFrom::Start(0))?;
            handle.set_len(0)?;
        }

        lock.deref_mut().write_all(content.as_bytes())?;
        Ok(())
    }

    /// Collect every reference: the refs tree, then packed-refs entries
    /// not shadowed by a loose file, then `HEAD`.
    ///
    /// Each name appears exactly once. Missing directories and a missing
    /// `HEAD` contribute nothing; a partially-initialized repository is
    /// legal.
    pub fn references(&mut self) -> Result<Vec<Reference>> {
        let mut refs = Vec::new();
        let mut seen = HashSet::new();

        self.add_refs_from_ref_dir(&mut refs, &mut seen)?;
        self.add_refs_from_packed_refs(&mut refs, &mut seen)?;
        self.add_ref_from_head(&mut refs)?;

        Ok(refs)
    }

    /// Number of references stored loose under the refs tree.
    pub fn count_loose_refs(&self) -> Result<usize> {
        let mut refs = Vec::new();
        let mut seen = HashSet::new();
        self.add_refs_from_ref_dir(&mut refs, &mut seen)?;

        Ok(refs.len())
    }

    /// Remove a reference by name: delete the loose file if present,
    /// then rewrite packed-refs without the entry.
    pub fn remove_reference(&mut self, name: &RefName) -> Result<()> {
        match std::fs::remove_file(self.path.join(name.to_path())) {
            Ok(()) => {}
            Err(err) if is_not_found(&err) => {}
            Err(err) => return Err(err.into()),
        }

        self.rewrite_packed_refs_without(name)
    }

    /// Consolidate all loose references into the packed-refs file.
    ///
    /// The packed-refs lock is held through the rename *and* the loose
    /// file deletions, so no reader can observe a reference in neither
    /// place. Loose files that vanished concurrently are skipped.
    pub fn pack_refs(&mut self) -> Result<()> {
        let packed_path = self.path.join(PACKED_REFS_PATH);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&packed_path)?;
        let _lock = file_guard::lock(&mut file, Lock::Exclusive, 0, 1)?;

        let mut refs = Vec::new();
        let mut seen = HashSet::new();
        self.add_refs_from_ref_dir(&mut refs, &mut seen)?;
        if refs.is_empty() {
            return Ok(());
        }

        let loose_count = refs.len();
        self.add_refs_from_packed_refs(&mut refs, &mut seen)?;

        let mut tmp = tempfile::Builder::new()
            .prefix(TMP_PACKED_REFS_PREFIX)
            .tempfile_in(&self.path)?;
        for reference in &refs {
            writeln!(tmp, "{}", reference.to_packed_line())?;
        }
        tmp.persist(&packed_path).map_err(|err| err.error)?;

        // still holding the lock: drop the loose files that were packed
        for reference in &refs[..loose_count] {
            match std::fs::remove_file(self.path.join(reference.name().to_path())) {
                Ok(()) => {}
                Err(err) if is_not_found(&err) => {}
                Err(err) => return Err(err.into()),
            }
        }

        self.cached_packed_refs = refs
            .iter()
            .map(|reference| (reference.name().clone(), reference.clone()))
            .collect();
        self.packed_refs_last_mod = Some(SystemTime::now());

        debug!(loose = loose_count, total = refs.len(), "packed loose refs");
        Ok(())
    }

    /// Bulk-initialize the packed-refs file, preserving input order.
    ///
    /// Only valid on an empty file: fails with
    /// [`Error::PackedRefsAlreadyInitialized`] otherwise.
    pub fn set_packed_refs(&mut self, refs: &[Reference]) -> Result<()> {
        // lock via a sibling lock file; packed-refs itself is created below
        let lock_path = self.path.join(TMP_PACKED_REFS_PREFIX);
        let mut lock_file = File::create(&lock_path)?;
        let lock = file_guard::lock(&mut lock_file, Lock::Exclusive, 0, 1)?;

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(self.path.join(PACKED_REFS_PATH))?;

        let mut existing = String::new();
        file.read_to_string(&mut existing)?;
        if !existing.is_empty() {
            return Err(Error::PackedRefsAlreadyInitialized);
        }

        let mut writer = BufWriter::new(&mut file);
        for reference in refs {
            writeln!(writer, "{}", reference.to_packed_line())?;
        }
        writer.flush()?;
        drop(writer);

        drop(lock);
        let _ = std::fs::remove_file(&lock_path);
        Ok(())
    }

    // ---- internals ----

    fn read_reference_file(&self, name: &RefName) -> Result<Reference> {
        let path = self.path.join(name.to_path());
        let content = std::fs::read_to_string(&path)?;

        Ok(Reference::from_content(name.clone(), &content))
    }

    fn add_refs_from_ref_dir(
        &self,
        refs: &mut Vec<Reference>,
        seen: &mut HashSet<RefName>,
    ) -> Result<()> {
        let root = self.path.join(REFS_PATH);

        for entry in WalkDir::new(&root) {
            let entry = match entry {
                Ok(entry) => entry,
                // a repository without a refs tree is legal
                Err(err) if err.io_error().is_some_and(is_not_found) => continue,
                Err(err) => {
                    return Err(err
                        .into_io_error()
                        .map(Error::Io)
                        .unwrap_or(Error::PathNotFound));
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let Ok(relative) = entry.path().strip_prefix(&self.path) else {
                continue;
            };
            let name = RefName::from_path(relative);
            let reference = self.read_reference_file(&name)?;

            if seen.insert(name) {
                refs.push(reference);
            }
        }

        Ok(())
    }

    fn add_refs_from_packed_refs(
        &mut self,
        refs: &mut Vec<Reference>,
        seen: &mut HashSet<RefName>,
    ) -> Result<()> {
        self.sync_packed_refs()?;

        for (name, reference) in &self.cached_packed_refs {
            if !seen.contains(name) {
                refs.push(reference.clone());
                seen.insert(name.clone());
            }
        }

        Ok(())
    }

    fn add_ref_from_head(&self, refs: &mut Vec<Reference>) -> Result<()> {
        match self.read_reference_file(&RefName::head()) {
            Ok(reference) => refs.push(reference),
            Err(Error::Io(err)) if is_not_found(&err) => {}
            Err(err) => return Err(err),
        }

        Ok(())
    }

    fn packed_ref(&mut self, name: &RefName) -> Result<Reference> {
        self.sync_packed_refs()?;

        self.cached_packed_refs
            .get(name)
            .cloned()
            .ok_or(Error::ReferenceNotFound)
    }

    /// Rebuild the packed-refs cache when the on-disk modification time
    /// strictly exceeds the cached one. An equal or older mtime is
    /// trusted.
    fn sync_packed_refs(&mut self) -> Result<()> {
        let packed_path = self.path.join(PACKED_REFS_PATH);
        let metadata = match std::fs::metadata(&packed_path) {
            Ok(metadata) => metadata,
            Err(err) if is_not_found(&err) => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        let mtime = metadata.modified()?;
        let fresh = self
            .packed_refs_last_mod
            .is_some_and(|cached| cached >= mtime);
        if fresh {
            return Ok(());
        }

        let file = match File::open(&packed_path) {
            Ok(file) => file,
            Err(err) if is_not_found(&err) => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        self.cached_packed_refs = HashMap::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            let Some(reference) = Self::process_line(&line)? else {
                continue;
            };

            let previous = self
                .cached_packed_refs
                .insert(reference.name().clone(), reference);
            if previous.is_some() {
                return Err(Error::PackedRefsDuplicatedRef);
            }
        }

        self.packed_refs_last_mod = Some(mtime);
        debug!(entries = self.cached_packed_refs.len(), "reloaded packed-refs cache");

        Ok(())
    }

    /// Parse one packed-refs line.
    ///
    /// Blank lines, comments (`#`) and peeled-tag annotations (`^`)
    /// yield nothing; an entry must be exactly `<hex40> <name>`.
    fn process_line(line: &str) -> Result<Option<Reference>> {
        match line.bytes().next() {
            None => Ok(None),
            Some(b'#') => Ok(None),
            Some(b'^') => Ok(None),
            Some(_) => {
                let tokens = line.split(' ').collect::<Vec<_>>();
                let &[hash, name] = tokens.as_slice() else {
                    return Err(Error::PackedRefsBadFormat);
                };

                let oid =
                    ObjectId::try_parse(hash).map_err(|_| Error::PackedRefsBadFormat)?;
                Ok(Some(Reference::direct(RefName::from(name), oid)))
            }
        }
    }

    fn rewrite_packed_refs_without(&mut self, name: &RefName) -> Result<()> {
        let packed_path = self.path.join(PACKED_REFS_PATH);

        let mut file = match OpenOptions::new().read(true).write(true).open(&packed_path) {
            Ok(file) => file,
            Err(err) if is_not_found(&err) => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        let _lock = file_guard::lock(&mut file, Lock::Exclusive, 0, 1)?;

        // re-open after locking: the file may have been renamed over
        // while the lock was being acquired
        let reopened = match File::open(&packed_path) {
            Ok(file) => file,
            Err(err) if is_not_found(&err) => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        let mut tmp = tempfile::Builder::new()
            .prefix(TMP_PACKED_REFS_PREFIX)
            .tempfile_in(&self.path)?;

        let mut found = false;
        for line in BufReader::new(reopened).lines() {
            let line = line?;

            if let Some(reference) = Self::process_line(&line)?
                && reference.name() == name
            {
                found = true;
                continue;
            }

            writeln!(tmp, "{}", line)?;
        }

        if !found {
            // nothing to remove; the temp file is deleted on drop
            return Ok(());
        }

        tmp.persist(&packed_path).map_err(|err| err.error)?;
        Ok(())
    }
}
