use player::*;

fn main() -> Result<(), AppError> {
    let settings = match std::env::args().nth(1) {
        Some(path) => PersistSettings::new(&path)?,
        None => PersistSettings::default(),
    };
    demo::run(&settings)
}
