use super::{colorize_kind, json_pretty, mode_string, CmdError, Context, EXIT_SUCCESS};
use ocirootfs_vfs::{normalize, walk, FileKind, Filesystem, Metadata};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Serialize)]
struct Listing {
    path: String,
    #[serde(skip)]
    file_kind: FileKind,
    kind: &'static str,
    mode: u32,
    size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    target: Option<String>,
}

fn listing(root: &dyn Filesystem, path: &Path, meta: &Metadata) -> Listing {
    Listing {
        path: format!("/{}", path.display()),
        file_kind: meta.kind,
        kind: meta.kind.as_str(),
        mode: meta.mode,
        size: meta.size,
        target: meta
            .is_symlink()
            .then(|| root.read_link(path).ok())
            .flatten()
            .map(|t| t.display().to_string()),
    }
}

pub fn run(ctx: &Context, path: &Path, recursive: bool) -> Result<u8, CmdError> {
    let entries = ctx.with_root(|root| {
        let meta = root.metadata(path)?;
        let base = normalize(path);
        if !meta.is_dir() {
            return Ok(vec![listing(root, &base, &root.symlink_metadata(path)?)]);
        }

        let nodes: Vec<(PathBuf, Metadata)> = if recursive {
            walk(root, path)?
        } else {
            root.read_dir(path)?
                .into_iter()
                .map(|entry| {
                    let child = base.join(&entry.name);
                    root.symlink_metadata(&child).map(|meta| (child, meta))
                })
                .collect::<Result<_, _>>()?
        };
        Ok(nodes
            .iter()
            .map(|(p, meta)| listing(root, p, meta))
            .collect::<Vec<_>>())
    })?;

    if ctx.json {
        println!("{}", json_pretty(&entries)?);
        return Ok(EXIT_SUCCESS);
    }

    for entry in &entries {
        let kind = entry.file_kind;
        let name = colorize_kind(kind, &entry.path);
        match &entry.target {
            Some(target) => println!(
                "{} {:>10} {name} -> {target}",
                mode_string(kind, entry.mode),
                entry.size
            ),
            None => println!("{} {:>10} {name}", mode_string(kind, entry.mode), entry.size),
        }
    }
    Ok(EXIT_SUCCESS)
}
