use anyhow::Result;

fn main() -> Result<()> {
    cdnpress::cli::execute()
}
