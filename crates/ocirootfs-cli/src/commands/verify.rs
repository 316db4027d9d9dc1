use super::{json_pretty, CmdError, Context, EXIT_FORMAT_ERROR, EXIT_SUCCESS};
use ocirootfs_store::verify_descriptors;

pub fn run(ctx: &Context) -> Result<u8, CmdError> {
    let image = ctx.inspect()?;

    let mut descriptors = vec![image.descriptor.clone()];
    descriptors.extend(image.manifest.config.iter().cloned());
    descriptors.extend(image.manifest.layers.iter().cloned());
    let report = verify_descriptors(&ctx.layout, &descriptors);

    if ctx.json {
        let failed: Vec<_> = report
            .failed
            .iter()
            .map(|f| serde_json::json!({ "digest": f.digest, "reason": f.reason }))
            .collect();
        let payload = serde_json::json!({
            "manifest": image.descriptor.digest.to_string(),
            "checked": report.checked,
            "passed": report.passed,
            "failed": failed,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!(
            "image {}: {}/{} blobs passed",
            image.descriptor.digest.short(),
            report.passed,
            report.checked
        );
        for f in &report.failed {
            println!("  FAIL {}: {}", f.digest, f.reason);
        }
    }

    if report.failed.is_empty() {
        Ok(EXIT_SUCCESS)
    } else {
        Ok(EXIT_FORMAT_ERROR)
    }
}
