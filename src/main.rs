fn main() -> Result<(), Box<dyn std::error::Error>> {
    tutorchat::cli::main()
}
