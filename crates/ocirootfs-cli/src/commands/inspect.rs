use super::{json_pretty, CmdError, Context, EXIT_SUCCESS};

pub fn run(ctx: &Context) -> Result<u8, CmdError> {
    let image = ctx.inspect()?;
    if ctx.json {
        println!("{}", json_pretty(&image)?);
        return Ok(EXIT_SUCCESS);
    }

    println!("ref:        {}", image.entry.ref_name().unwrap_or("(none)"));
    if image.entry.digest != image.descriptor.digest {
        println!("index:      {}", image.entry.digest);
    }
    println!("manifest:   {}", image.descriptor.digest);
    println!(
        "platform:   {}",
        image
            .descriptor
            .platform
            .as_ref()
            .map_or_else(|| "(unspecified)".to_owned(), ToString::to_string)
    );
    if let Some(config) = &image.manifest.config {
        println!("config:     {}", config.digest);
    }
    println!("layers:     {}", image.manifest.layers.len());
    for (i, layer) in image.manifest.layers.iter().enumerate() {
        println!(
            "  {i:>2}  {}  {:>10}  {}",
            layer.digest.short(),
            layer.size,
            layer.media_type
        );
    }
    Ok(EXIT_SUCCESS)
}
