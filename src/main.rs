fn main() {
    if let Err(e) = year_bracket_lib::run() {
        eprintln!("year-bracket: {e}");
        std::process::exit(1);
    }
}
