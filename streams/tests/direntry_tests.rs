// Path reconstruction over open directory chains.

use fatkit_streams::{DirEntry, DirTree, MemStream, Slot, StreamHandle};

fn tree_with_dirs(drive: char, names: &[&str]) -> (DirTree, Vec<fatkit_streams::DirId>) {
    let mut tree = DirTree::new();
    let image = StreamHandle::new(Box::new(MemStream::new(vec![0; 512])));
    let mut ids = vec![tree.open_root(drive, Some(image.clone()))];
    for (i, name) in names.iter().enumerate() {
        let parent = ids[ids.len() - 1];
        let entry = DirEntry::found(parent, i as u32 + 2, *name);
        ids.push(tree.open_subdir(entry, Some(image.clone())).unwrap());
    }
    (tree, ids)
}

#[test]
fn test_root_renders_with_slash() {
    let (tree, ids) = tree_with_dirs('A', &[]);
    let root = tree.direntry(ids[0]).unwrap();
    assert_eq!(tree.render(root, false).unwrap(), "A:/");
    assert_eq!(tree.render(root, true).unwrap(), "\"A:/\"");
    assert_eq!(tree.pwd(root).unwrap(), "A:/");
}

#[test]
fn test_escaped_nested_name() {
    let (tree, ids) = tree_with_dirs('A', &["My$File"]);
    let entry = tree.direntry(ids[1]).unwrap();
    assert_eq!(tree.render(entry, true).unwrap(), "\"A:/My\\$File\"");
    assert_eq!(tree.render(entry, false).unwrap(), "A:/My$File");
}

#[test]
fn test_only_names_needing_it_are_escaped() {
    let (tree, ids) = tree_with_dirs('C', &["plain", "a\"b\\c"]);
    let entry = tree.direntry(ids[2]).unwrap();
    assert_eq!(tree.render(entry, true).unwrap(), r#""C:/plain/a\"b\\c""#);
    assert_eq!(tree.pwd(entry).unwrap(), "C:/plain/a\"b\\c");
}

#[test]
fn test_streaming_matches_owned_rendering() {
    let (tree, ids) = tree_with_dirs('D', &["one", "two", "three"]);
    let file = DirEntry::found(ids[3], 9, "file.txt");

    let mut out = String::from("pwd: ");
    tree.write_pwd(&mut out, &file, false).unwrap();
    assert_eq!(out, "pwd: D:/one/two/three/file.txt");
    assert_eq!(tree.path_len(&file).unwrap(), "D:/one/two/three/file.txt".len());
}

#[test]
fn test_parent_chain() {
    let (tree, ids) = tree_with_dirs('A', &["x", "y"]);
    let y = tree.direntry(ids[2]).unwrap();
    let x = tree.parent(y).unwrap();
    assert_eq!(x.name, "x");
    assert_eq!(tree.parent(x).unwrap().slot, Slot::Root);
    assert_eq!(tree.drive(ids[2]).unwrap(), 'A');
    assert_eq!(tree.stream(ids[2]).unwrap().map(|s| s.refs()), Some(3));
}

#[test]
fn test_subdir_predicate() {
    let (mut tree, ids) = tree_with_dirs('A', &["x", "y"]);
    let other = tree.open_subdir(DirEntry::found(ids[0], 7, "z"), None).unwrap();

    assert!(tree.is_subdir_of(ids[2], ids[0]).unwrap());
    assert!(tree.is_subdir_of(ids[2], ids[1]).unwrap());
    assert!(tree.is_subdir_of(ids[1], ids[1]).unwrap());
    assert!(!tree.is_subdir_of(ids[1], ids[2]).unwrap());
    assert!(!tree.is_subdir_of(other, ids[1]).unwrap());
}

#[test]
fn test_close_releases_stream() {
    let (mut tree, ids) = tree_with_dirs('A', &["x", "y"]);
    let image = tree.stream(ids[0]).unwrap().cloned().unwrap();
    assert_eq!(image.refs(), 4);

    assert!(tree.close(ids[1]).is_err());
    tree.close(ids[2]).unwrap();
    assert_eq!(image.refs(), 3);
    tree.close(ids[1]).unwrap();
    tree.close(ids[0]).unwrap();
    assert_eq!(image.refs(), 1);
    assert!(tree.stream(ids[0]).is_err());
    assert!(tree.is_empty());
}
