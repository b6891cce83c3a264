fn main() -> anyhow::Result<()> {
    copypeer_lib::run()
}
