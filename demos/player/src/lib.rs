pub mod data;
pub mod demo;

pub use data::*;
pub use dirtybit::*;

use serde::{Deserialize, Serialize};

#[derive(Message, Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct PlayerInfo {
    pub level: i32,
    pub exp: i64,
    pub name: String,
}

#[derive(Message, Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Item {
    pub cfg_id: i32,
    pub num: i32,
}

#[derive(Message, Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Sword {
    pub damage: u32,
}

#[derive(Message, Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[message(name = "shield")]
pub struct Shield {
    pub armor: u32,
    pub broken: bool,
}

/// Level and experience, stored as a plain document under the component name.
#[derive(Saveable, Debug)]
pub struct BaseInfo {
    #[component]
    base: BaseComponent,
    #[db(plain)]
    pub info: MessageData<PlayerInfo>,
}

impl BaseInfo {
    pub const NAME: &'static str = "BaseInfo";

    pub fn new() -> Self {
        BaseInfo { base: BaseComponent::new(Self::NAME), info: MessageData::default() }
    }

    pub fn add_exp(&mut self, exp: i64) {
        self.info.value_mut().exp += exp;
    }
}

/// Items keyed by slot plus an optional list of equipped item ids, each child has its own cache key.
#[derive(Saveable, Debug)]
pub struct Bag {
    #[component]
    base: BaseComponent,
    #[child]
    pub items: MapData<i32, Item>,
    #[child]
    pub equips: Option<SliceData<i32>>,
}

impl Bag {
    pub const NAME: &'static str = "Bag";

    pub fn new() -> Self {
        Bag { base: BaseComponent::new(Self::NAME), items: MapData::new(), equips: None }
    }

    pub fn equip(&mut self, item_id: i32) {
        self.equips.get_or_insert_with(SliceData::new).add([item_id]);
    }
}

/// Quest progress and rewards of registered message types.
#[derive(Saveable, Debug)]
pub struct Quest {
    #[component]
    base: BaseComponent,
    #[child]
    pub progress: MapData<String, i32>,
    #[child(name = "Rewards")]
    pub rewards: DynamicMapData<String>,
}

impl Quest {
    pub const NAME: &'static str = "Quest";

    pub fn new() -> Self {
        Quest { base: BaseComponent::new(Self::NAME), progress: MapData::new(), rewards: DynamicMapData::new() }
    }
}

/// Fixed size attribute array, the component carries the marker itself.
#[derive(Saveable, Debug)]
pub struct Stats {
    #[component]
    base: BaseComponent,
    #[mark]
    mark: BaseDirtyMark,
    #[db]
    pub values: [i32; 4],
}

impl Stats {
    pub const NAME: &'static str = "Stats";

    pub fn new() -> Self {
        Stats { base: BaseComponent::new(Self::NAME), mark: BaseDirtyMark::default(), values: [0; 4] }
    }

    pub fn set(&mut self, index: usize, value: i32) {
        if let Some(slot) = self.values.get_mut(index) {
            wrapper::set_field(&mut self.mark, slot, value);
        }
    }

    pub fn dirty_mark(&self) -> &BaseDirtyMark {
        &self.mark
    }
}
