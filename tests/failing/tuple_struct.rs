#![allow(dead_code)]

#[derive(dirtybit::Saveable)]
struct Pair(i32, i32);

fn main() {}
