fn main() -> anyhow::Result<()> {
    freenote_lib::run()
}
