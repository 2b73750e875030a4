use anyhow::Result;

fn main() -> Result<()> {
    devcapsule::cli::run(devcapsule::cli::CliMode::Launch)
}
