use super::{json_pretty, mode_string, CmdError, Context, EXIT_SUCCESS};
use ocirootfs_vfs::{normalize, Filesystem};
use std::path::Path;

pub fn run(ctx: &Context, path: &Path) -> Result<u8, CmdError> {
    let (meta, target) = ctx.with_root(|root| {
        let meta = root.symlink_metadata(path)?;
        let target = if meta.is_symlink() {
            Some(root.read_link(path)?)
        } else {
            None
        };
        Ok((meta, target))
    })?;
    let shown = format!("/{}", normalize(path).display());

    if ctx.json {
        let payload = serde_json::json!({
            "path": shown,
            "kind": meta.kind.as_str(),
            "mode": format!("{:04o}", meta.mode),
            "size": meta.size,
            "uid": meta.uid,
            "gid": meta.gid,
            "mtime": meta.mtime,
            "target": target.as_ref().map(|t| t.display().to_string()),
        });
        println!("{}", json_pretty(&payload)?);
        return Ok(EXIT_SUCCESS);
    }

    println!("path:   {shown}");
    if let Some(target) = &target {
        println!("target: {}", target.display());
    }
    println!("kind:   {}", meta.kind.as_str());
    println!("mode:   {:04o} ({})", meta.mode, mode_string(meta.kind, meta.mode));
    println!("size:   {}", meta.size);
    println!("owner:  {}:{}", meta.uid, meta.gid);
    println!("mtime:  {}", meta.mtime);
    Ok(EXIT_SUCCESS)
}
