use burrow_core::version::{version_string, VERSION};
use miette::Result;

pub fn run(json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::json!({
                "ok": true,
                "version": VERSION,
                "user_agent": burrow_core::version::user_agent(),
            })
        );
    } else {
        println!("{}", version_string());
    }
    Ok(())
}
