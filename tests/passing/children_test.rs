#![allow(warnings)]

use dirtybit::*;

#[derive(Message, Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[message(name = "card")]
pub struct Card {
    pub rank: u8,
}

#[derive(Saveable, Debug)]
pub struct Deck {
    #[component]
    base: BaseComponent,
    #[child]
    pub cards: MapData<u32, Card>,
    #[child(name = "Discarded")]
    pub discarded: Option<SliceData<u32>>,
    #[child]
    pub extras: Option<Box<DynamicMapData<String>>>,
    pub transient: Vec<String>,
}

fn main() {
    let mut registry = SchemaRegistry::new(NamingPolicy::LowerCase);
    registry.register_dynamic::<Card>();
    let mut deck = Deck {
        base: BaseComponent::new("Deck"),
        cards: MapData::new(),
        discarded: None,
        extras: None,
        transient: Vec::new(),
    };
    deck.cards.set(1, Card { rank: 3 });
    let tree = registry.schema_of(&deck).expect("schema");
    assert_eq!(tree.children.len(), 3);
}
