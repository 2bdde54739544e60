use anyhow::Result;

fn main() -> Result<()> {
    npu_prestart::cli::run()
}
