use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};

use nova_core::{normalize_path, path_key};
use nova_pom_model::{Coordinate, POM_FILE_NAME};

use crate::pom::scan_pom_lenient;

/// Breadth-first search for `pom.xml` files under `root`.
///
/// Hidden directories and directories named in `skip_dirs` are not entered.
/// `root` may also be a POM file itself. Results are in BFS order, sorted
/// within each directory so discovery is deterministic.
pub fn discover_pom_files(root: &Path, skip_dirs: &[String]) -> Vec<PathBuf> {
    if root.is_file() {
        return vec![normalize_path(root)];
    }

    let mut out = Vec::new();
    let mut queue = VecDeque::from([normalize_path(root)]);
    while let Some(dir) = queue.pop_front() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        let mut children: Vec<(PathBuf, bool)> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let file_type = entry.file_type().ok()?;
                Some((entry.path(), file_type.is_dir()))
            })
            .collect();
        children.sort();

        for (path, is_dir) in children {
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            if is_dir {
                if name.starts_with('.') || skip_dirs.iter().any(|skip| skip == name) {
                    continue;
                }
                queue.push_back(path);
            } else if name == POM_FILE_NAME {
                out.push(path);
            }
        }
    }
    out
}

/// The POM file a workspace root refers to: the root itself if it is a file,
/// otherwise `root/pom.xml`.
pub fn root_pom(root: &Path) -> PathBuf {
    if root.extension().is_some_and(|ext| ext == "xml") || root.is_file() {
        root.to_path_buf()
    } else {
        root.join(POM_FILE_NAME)
    }
}

struct RootInfo {
    coordinate: Option<Coordinate>,
    parent_coordinate: Option<Coordinate>,
    parent_file: Option<PathBuf>,
}

/// Orders workspace roots so a parent is listed before its children.
///
/// A root depends on another when its `<parent>` coordinate matches the
/// other's coordinate, when its `relativePath` points at the other's POM, or
/// when the other root's directory contains it. Roots whose POM cannot be read
/// only participate through directory containment. Cycles are broken in path
/// order.
pub fn sort_parent_first(roots: &[PathBuf]) -> Vec<PathBuf> {
    let mut unique: BTreeMap<String, PathBuf> = BTreeMap::new();
    for root in roots {
        let root = normalize_path(root);
        unique.entry(path_key(&root)).or_insert(root);
    }
    let keys: Vec<String> = unique.keys().cloned().collect();

    let infos: HashMap<&str, RootInfo> = unique
        .iter()
        .map(|(key, root)| (key.as_str(), read_root_info(root)))
        .collect();
    let by_coordinate: HashMap<&Coordinate, &str> = infos
        .iter()
        .filter_map(|(key, info)| Some((info.coordinate.as_ref()?, *key)))
        .collect();
    let pom_keys: HashMap<String, &str> = unique
        .iter()
        .map(|(key, root)| (path_key(&root_pom(root)), key.as_str()))
        .collect();

    // parents[child] = set of roots that must come first.
    let mut parents: HashMap<&str, BTreeSet<&str>> = HashMap::new();
    for child in &keys {
        let child_dir = path_key(&unique[child]);
        let info = &infos[child.as_str()];
        let deps = parents.entry(child.as_str()).or_default();

        if let Some(parent) = info
            .parent_coordinate
            .as_ref()
            .and_then(|coordinate| by_coordinate.get(coordinate))
        {
            deps.insert(*parent);
        }
        if let Some(parent) = info
            .parent_file
            .as_ref()
            .and_then(|file| pom_keys.get(&path_key(file)))
        {
            deps.insert(*parent);
        }
        for other in &keys {
            if other != child && child_dir.starts_with(&format!("{other}/")) {
                deps.insert(other.as_str());
            }
        }
        deps.remove(child.as_str());
    }

    let mut ordered = Vec::with_capacity(keys.len());
    let mut placed: BTreeSet<&str> = BTreeSet::new();
    while placed.len() < keys.len() {
        let ready = keys.iter().map(String::as_str).find(|key| {
            !placed.contains(key) && parents[key].iter().all(|parent| placed.contains(parent))
        });
        // On a cycle, release the first unplaced root in path order.
        let next = ready.or_else(|| {
            keys.iter()
                .map(String::as_str)
                .find(|key| !placed.contains(key))
        });
        let Some(next) = next else {
            break;
        };
        placed.insert(next);
        ordered.push(unique[next].clone());
    }
    ordered
}

fn read_root_info(root: &Path) -> RootInfo {
    let pom_path = root_pom(root);
    let Ok(text) = std::fs::read_to_string(&pom_path) else {
        return RootInfo {
            coordinate: None,
            parent_coordinate: None,
            parent_file: None,
        };
    };
    let pom = scan_pom_lenient(&text);
    let parent_file = pom.parent.as_ref().and_then(|parent| {
        let dir = pom_path.parent()?;
        let relative = parent.effective_relative_path();
        if relative.is_empty() {
            return None;
        }
        Some(root_pom(&normalize_path(&dir.join(relative))))
    });
    RootInfo {
        coordinate: pom.inherited_coordinate().complete(),
        parent_coordinate: pom
            .parent
            .as_ref()
            .and_then(|parent| parent.coordinate.complete()),
        parent_file,
    }
}
