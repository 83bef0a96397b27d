use crate::{Bag, BaseInfo, Item, Quest, Shield, Stats, Sword};
use dirtybit::*;

pub fn player_registry(naming: NamingPolicy) -> SchemaRegistry {
    let mut registry = SchemaRegistry::new(naming);
    registry.register_dynamic::<Sword>().register_dynamic::<Shield>();
    registry
}

fn components() -> Vec<Box<dyn Component>> {
    vec![Box::new(BaseInfo::new()), Box::new(Bag::new()), Box::new(Quest::new()), Box::new(Stats::new())]
}

/// A player with every component, loaded from `doc` when given.
pub fn new_player(registry: &SchemaRegistry, id: i64, doc: Option<&Document>) -> Result<BaseEntity, AppError> {
    let mut player = BaseEntity::new(id);
    for component in components() {
        let source = doc.and_then(|d| d.get(&registry.component_name(component.name()))).cloned();
        player.add_component(registry, component, source)?;
    }
    Ok(player)
}

/// Creates the player document on first login, otherwise loads it.
pub fn login(registry: &SchemaRegistry, db: &dyn EntityDb, id: i64) -> Result<BaseEntity, AppError> {
    match db.find_entity_by_id(id)? {
        Some(doc) => new_player(registry, id, Some(&doc)),
        None => {
            let player = new_player(registry, id, None)?;
            db.insert_entity(id, &get_entity_save_data(registry, &player)?)?;
            info!("player {} created", id);
            Ok(player)
        }
    }
}

/// Replays whatever an unclean shutdown left in the cache, then returns the loaded player.
pub fn login_after_crash(
    registry: &SchemaRegistry,
    db: &dyn EntityDb,
    cache: &dyn KvCache,
    prefix: &str,
    id: i64,
) -> Result<BaseEntity, AppError> {
    let mut player = login(registry, db, id)?;
    let fixed = fix_entity_data_from_cache(registry, &mut player, db, cache, prefix, id)?;
    if fixed > 0 {
        info!("player {} recovered {} cache entries", id, fixed);
    }
    Ok(player)
}

/// Sample mutations touching every component.
pub fn play_session(player: &mut BaseEntity) {
    if let Some(info) = player.get_mut::<BaseInfo>() {
        info.add_exp(50);
        info.info.value_mut().level += 1;
    }
    if let Some(bag) = player.get_mut::<Bag>() {
        bag.items.set(1, Item { cfg_id: 1001, num: 3 });
        bag.items.set(2, Item { cfg_id: 1002, num: 1 });
        bag.equip(1001);
    }
    if let Some(quest) = player.get_mut::<Quest>() {
        quest.progress.set("kill_wolves".to_string(), 7);
        quest.rewards.insert("first".to_string(), Sword { damage: 12 });
        quest.rewards.insert("second".to_string(), Shield { armor: 4, broken: false });
    }
    if let Some(stats) = player.get_mut::<Stats>() {
        stats.set(0, 10);
        stats.set(3, 5);
    }
}
