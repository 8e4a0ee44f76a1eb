use anyhow::Result;

fn main() -> Result<()> {
    firejail_core::cli::run()
}
