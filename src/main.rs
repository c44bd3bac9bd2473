fn main() -> anyhow::Result<()> {
    wire_reader_lib::run()
}
