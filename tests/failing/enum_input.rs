#![allow(dead_code)]

#[derive(dirtybit::Saveable)]
enum Level {
    Low,
    High,
}

fn main() {}
