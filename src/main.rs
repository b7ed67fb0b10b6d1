fn main() {
    if let Err(err) = face_composer::run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
