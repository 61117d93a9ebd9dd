fn main() -> anyhow::Result<()> {
    hive::run()?;
    Ok(())
}
