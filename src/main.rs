use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    labchat::cli::main()
}
