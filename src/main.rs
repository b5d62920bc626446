fn main() -> anyhow::Result<()> {
    healthtrack::run()
}
