fn main() {
    if let Err(err) = survey_pipeline::run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
