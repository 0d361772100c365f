use pulse_loadtest::noise::NoiseGenerator;

fn main() {
    match NoiseGenerator::initialize().and_then(|generator| generator.execute()) {
        Ok(stats) if stats.success > 0 => (),
        Ok(_) => std::process::exit(1),
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    }
}
