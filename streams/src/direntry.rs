// Directory entries and the open-directory arena used to rebuild paths.
//
// Every open directory remembers the entry it was opened from. Directories
// are only ever opened below one that is already open, so the parent of a
// directory always has a smaller id and walking parents ends at a root.
// Ids are never reused; a closed directory keeps its id as a dead slot.

use crate::stream::StreamHandle;
use fatkit_core::{FatError, Result};
use log::debug;
use std::fmt::{self, Write};
use std::ops::Range;

/// Longest directory entry name, in characters.
pub const MAX_VNAMELEN: usize = 255;

const NEED_ESCAPE: &[char] = &['"', '$', '\\'];

/// Handle of an open directory in a `DirTree`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DirId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Unresolved,
    NotFound,
    /// The entry stands for the root directory itself.
    Root,
    Index(u32),
}

/// One slot of a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub slot: Slot,
    /// Directory holding the slot.
    pub dir: DirId,
    pub name: String,
    /// First and one-past-last slot used, long name entries included.
    pub begin_slot: u32,
    pub end_slot: u32,
}

impl DirEntry {
    /// Unresolved entry of `dir`, ready for a lookup.
    pub fn new(dir: DirId) -> Self {
        Self {
            slot: Slot::Unresolved,
            dir,
            name: String::new(),
            begin_slot: 0,
            end_slot: 0,
        }
    }

    pub fn found(dir: DirId, index: u32, name: impl Into<String>) -> Self {
        Self::found_at(dir, index, index, name)
    }

    /// Entry whose long name slots start at `begin_slot` and whose short
    /// entry sits at `index`.
    pub fn found_at(dir: DirId, begin_slot: u32, index: u32, name: impl Into<String>) -> Self {
        Self {
            slot: Slot::Index(index),
            dir,
            name: name.into(),
            begin_slot,
            end_slot: index + 1,
        }
    }

    /// Slots to clear when the entry is deleted.
    pub fn slot_span(&self) -> Range<u32> {
        self.begin_slot..self.end_slot
    }

    pub fn is_not_found(&self) -> bool {
        self.slot == Slot::NotFound
    }

    pub fn is_root(&self) -> bool {
        self.slot == Slot::Root
    }
}

struct OpenDir {
    entry: DirEntry,
    drive: char,
    stream: Option<StreamHandle>,
}

/// Arena of open directories.
#[derive(Default)]
pub struct DirTree {
    dirs: Vec<Option<OpenDir>>,
}

impl DirTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of directories currently open.
    pub fn len(&self) -> usize {
        self.dirs.iter().filter(|d| d.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn node(&self, id: DirId) -> Result<&OpenDir> {
        match self.dirs.get(id.0) {
            Some(Some(node)) => Ok(node),
            Some(None) => Err(FatError::InvalidInput(format!("directory {:?} is closed", id))),
            None => Err(FatError::InvalidInput(format!("unknown directory {:?}", id))),
        }
    }

    /// Open the root directory of `drive`.
    pub fn open_root(&mut self, drive: char, stream: Option<StreamHandle>) -> DirId {
        let id = DirId(self.dirs.len());
        let mut entry = DirEntry::new(id);
        entry.slot = Slot::Root;
        self.dirs.push(Some(OpenDir {
            entry,
            drive,
            stream,
        }));
        id
    }

    /// Open the subdirectory described by `entry`, which must be a resolved
    /// slot of an open directory.
    pub fn open_subdir(&mut self, entry: DirEntry, stream: Option<StreamHandle>) -> Result<DirId> {
        if !matches!(entry.slot, Slot::Index(_)) {
            return Err(FatError::InvalidInput(format!(
                "cannot open directory from {:?} entry",
                entry.slot
            )));
        }
        if entry.begin_slot >= entry.end_slot {
            return Err(FatError::InvalidInput(format!(
                "empty slot span {:?}",
                entry.slot_span()
            )));
        }
        if entry.name.chars().count() > MAX_VNAMELEN {
            return Err(FatError::InvalidInput(format!(
                "name longer than {} characters",
                MAX_VNAMELEN
            )));
        }
        let drive = self.node(entry.dir)?.drive;
        let id = DirId(self.dirs.len());
        if entry.dir >= id {
            return Err(FatError::Internal(format!(
                "parent {:?} does not precede {:?}",
                entry.dir, id
            )));
        }
        self.dirs.push(Some(OpenDir {
            entry,
            drive,
            stream,
        }));
        Ok(id)
    }

    /// Close `dir` and release its stream. Directories opened below it must
    /// be closed first.
    pub fn close(&mut self, dir: DirId) -> Result<()> {
        self.node(dir)?;
        let busy = self.dirs.iter().enumerate().any(|(i, d)| {
            matches!(d, Some(node) if i != dir.0 && node.entry.dir == dir)
        });
        if busy {
            return Err(FatError::InvalidInput(format!(
                "directory {:?} still has open subdirectories",
                dir
            )));
        }
        if let Some(node) = self.dirs[dir.0].take() {
            debug!("Closed directory {:?} of drive {}:", dir, node.drive);
        }
        Ok(())
    }

    /// The entry `dir` was opened from.
    pub fn direntry(&self, dir: DirId) -> Result<&DirEntry> {
        Ok(&self.node(dir)?.entry)
    }

    pub fn drive(&self, dir: DirId) -> Result<char> {
        Ok(self.node(dir)?.drive)
    }

    pub fn stream(&self, dir: DirId) -> Result<Option<&StreamHandle>> {
        Ok(self.node(dir)?.stream.as_ref())
    }

    /// Entry of the directory holding `entry`.
    pub fn parent(&self, entry: &DirEntry) -> Result<&DirEntry> {
        self.direntry(entry.dir)
    }

    /// Entries from `entry` up to, not including, the root; plus the drive.
    fn chain<'a>(&'a self, mut entry: &'a DirEntry) -> Result<(Vec<&'a DirEntry>, char)> {
        let mut chain = Vec::new();
        while !entry.is_root() {
            chain.push(entry);
            entry = self.parent(entry)?;
        }
        Ok((chain, self.drive(entry.dir)?))
    }

    /// Characters in the absolute path of `entry`.
    pub fn path_len(&self, entry: &DirEntry) -> Result<usize> {
        let (chain, _) = self.chain(entry)?;
        if chain.is_empty() {
            return Ok(3);
        }
        Ok(2 + chain.iter().map(|e| 1 + e.name.chars().count()).sum::<usize>())
    }

    /// Absolute path of `entry`, e.g. `A:/DOS/COMMAND.COM`.
    pub fn pwd(&self, entry: &DirEntry) -> Result<String> {
        let (chain, drive) = self.chain(entry)?;
        let mut path = String::with_capacity(self.path_len(entry)?);
        path.push(drive);
        path.push_str(":/");
        for (i, e) in chain.iter().rev().enumerate() {
            if i > 0 {
                path.push('/');
            }
            path.push_str(&e.name);
        }
        Ok(path)
    }

    /// Stream the path of `entry` into `out`. With `escape` the path is
    /// double-quoted and `"`, `$` and `\` inside names get a backslash.
    pub fn write_pwd<W: Write>(&self, out: &mut W, entry: &DirEntry, escape: bool) -> Result<()> {
        let (chain, drive) = self.chain(entry)?;
        emit(out, &chain, drive, escape)
            .map_err(|_| FatError::Internal("path output failed".to_string()))
    }

    pub fn render(&self, entry: &DirEntry, escape: bool) -> Result<String> {
        let mut out = String::new();
        self.write_pwd(&mut out, entry, escape)?;
        Ok(out)
    }

    /// True if `inside` is `outside` or lies somewhere below it.
    pub fn is_subdir_of(&self, mut inside: DirId, outside: DirId) -> Result<bool> {
        loop {
            if inside == outside {
                return Ok(true);
            }
            let entry = self.direntry(inside)?;
            if entry.is_root() {
                return Ok(false);
            }
            inside = entry.dir;
        }
    }
}

fn emit<W: Write>(out: &mut W, chain: &[&DirEntry], drive: char, escape: bool) -> fmt::Result {
    if escape {
        out.write_char('"')?;
    }
    out.write_char(drive)?;
    out.write_char(':')?;
    if chain.is_empty() {
        out.write_char('/')?;
    }
    for e in chain.iter().rev() {
        out.write_char('/')?;
        if escape && e.name.contains(NEED_ESCAPE) {
            for c in e.name.chars() {
                if NEED_ESCAPE.contains(&c) {
                    out.write_char('\\')?;
                }
                out.write_char(c)?;
            }
        } else {
            out.write_str(&e.name)?;
        }
    }
    if escape {
        out.write_char('"')?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_states() {
        let mut tree = DirTree::new();
        let root = tree.open_root('C', None);
        let mut e = DirEntry::new(root);
        assert_eq!(e.slot, Slot::Unresolved);
        e.slot = Slot::NotFound;
        assert!(e.is_not_found());
        assert!(tree.direntry(root).unwrap().is_root());
    }

    #[test]
    fn test_subdir_requires_resolved_slot() {
        let mut tree = DirTree::new();
        let root = tree.open_root('A', None);
        assert!(tree.open_subdir(DirEntry::new(root), None).is_err());
        let long = "x".repeat(MAX_VNAMELEN + 1);
        assert!(tree.open_subdir(DirEntry::found(root, 3, long), None).is_err());
        assert!(tree.direntry(DirId(9)).is_err());
    }

    #[test]
    fn test_path_len_matches_pwd() {
        let mut tree = DirTree::new();
        let root = tree.open_root('B', None);
        let sub = tree.open_subdir(DirEntry::found(root, 2, "GAMES"), None).unwrap();
        let file = DirEntry::found(sub, 5, "TETRIS.EXE");
        assert_eq!(tree.pwd(&file).unwrap(), "B:/GAMES/TETRIS.EXE");
        assert_eq!(tree.path_len(&file).unwrap(), "B:/GAMES/TETRIS.EXE".len());
        assert_eq!(tree.path_len(tree.direntry(root).unwrap()).unwrap(), 3);

        let top = DirEntry::found(root, 0, "AUTOEXEC.BAT");
        assert_eq!(tree.path_len(&top).unwrap(), tree.pwd(&top).unwrap().len());
    }

    #[test]
    fn test_slot_span_covers_long_name() {
        let mut tree = DirTree::new();
        let root = tree.open_root('A', None);
        let entry = DirEntry::found_at(root, 4, 7, "Long Directory Name");
        assert_eq!(entry.slot_span(), 4..8);
        assert_eq!(DirEntry::found(root, 3, "X").slot_span(), 3..4);
        assert!(tree.open_subdir(entry, None).is_ok());

        let mut broken = DirEntry::found(root, 5, "BAD");
        broken.begin_slot = 6;
        assert!(tree.open_subdir(broken, None).is_err());
    }

    #[test]
    fn test_closed_directory_is_gone() {
        let mut tree = DirTree::new();
        let root = tree.open_root('A', None);
        let sub = tree.open_subdir(DirEntry::found(root, 2, "DOS"), None).unwrap();
        assert!(tree.close(root).is_err());
        tree.close(sub).unwrap();
        assert!(tree.direntry(sub).is_err());
        assert!(tree.close(sub).is_err());
        assert_eq!(tree.len(), 1);

        // A fresh open never reuses the closed id.
        let again = tree.open_subdir(DirEntry::found(root, 2, "DOS"), None).unwrap();
        assert_ne!(again, sub);
        tree.close(again).unwrap();
        tree.close(root).unwrap();
        assert!(tree.is_empty());
    }
}
