#![allow(dead_code)]

#[derive(dirtybit::Saveable)]
struct Counter {
    #[db(fast)]
    pub count: u32,
}

fn main() {}
