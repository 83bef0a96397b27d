#![allow(warnings)]

use dirtybit::*;

#[derive(Saveable, Debug, Default)]
pub struct Counter {
    #[mark]
    mark: BaseDirtyMark,
    #[db]
    pub count: i64,
}

impl Counter {
    fn bump(&mut self) {
        let next = self.count + 1;
        wrapper::set_field(&mut self.mark, &mut self.count, next);
    }
}

fn main() {
    let mut counter = Counter::default();
    counter.bump();
    let cache = MemoryCache::new();
    let registry = SchemaRegistry::new(NamingPolicy::Verbatim);
    let tree = registry.schema_of(&counter).expect("schema");
    let field = tree.field.clone().expect("single field");
    assert!(save_changed_data_to_cache(&cache, "counter", &mut counter, &field).expect("push"));
}
