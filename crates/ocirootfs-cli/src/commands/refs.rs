use super::{json_pretty, CmdError, Context, EXIT_SUCCESS};
use serde::Serialize;

#[derive(Serialize)]
struct RefEntry {
    #[serde(rename = "ref")]
    reference: Option<String>,
    media_type: String,
    digest: String,
    size: u64,
    platform: Option<String>,
}

pub fn run(ctx: &Context) -> Result<u8, CmdError> {
    ctx.layout.verify_version()?;
    let index = ctx.layout.read_index()?;

    let entries: Vec<RefEntry> = index
        .manifests
        .iter()
        .map(|desc| RefEntry {
            reference: desc.ref_name().map(str::to_owned),
            media_type: desc.media_type.to_string(),
            digest: desc.digest.to_string(),
            size: desc.size,
            platform: desc.platform.as_ref().map(ToString::to_string),
        })
        .collect();

    if ctx.json {
        println!("{}", json_pretty(&entries)?);
        return Ok(EXIT_SUCCESS);
    }

    if entries.is_empty() {
        println!("no images in {}", ctx.layout.index_path().display());
        return Ok(EXIT_SUCCESS);
    }
    println!("{:<24} {:<14} {:<16} MEDIA TYPE", "REF", "DIGEST", "PLATFORM");
    for (entry, desc) in entries.iter().zip(&index.manifests) {
        println!(
            "{:<24} {:<14} {:<16} {}",
            entry.reference.as_deref().unwrap_or("<none>"),
            desc.digest.short(),
            entry.platform.as_deref().unwrap_or("-"),
            entry.media_type
        );
    }
    Ok(EXIT_SUCCESS)
}
