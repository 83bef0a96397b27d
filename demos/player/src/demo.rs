use crate::{login, login_after_crash, play_session, player_registry, BaseInfo};
use dirtybit::*;

/// One session of a player: login, play, push to the cache, crash before the flush, recover, flush.
pub fn run(settings: &PersistSettings) -> Result<(), AppError> {
    settings.init_logger()?;
    let registry = player_registry(settings.naming_policy());
    let cache = settings.open_cache()?;
    let db = settings.open_db()?;
    let prefix = settings.cache.key_prefix.as_str();
    let id = i64::from(rand::random::<u32>());

    let mut player = login(&registry, &db, id)?;
    play_session(&mut player);
    player.save_cache(&registry, cache.as_ref(), prefix)?;
    info!("player {} pushed to cache, dropping it before the flush", id);
    drop(player);

    let mut player = login_after_crash(&registry, &db, cache.as_ref(), prefix, id)?;
    if let Some(base) = player.get::<BaseInfo>() {
        info!("player {} recovered at level {} with {} exp", id, base.info.value().level, base.info.value().exp);
    }

    play_session(&mut player);
    player.save_cache(&registry, cache.as_ref(), prefix)?;
    let flushed = save_entity_changed_data_to_db(&registry, &db, &mut player, cache.as_ref(), prefix, settings.cache.remove_after_flush)?;
    info!("player {} flushed {} entries", id, flushed);

    if let Some(doc) = db.find_entity_by_id(id)? {
        for (component, value) in doc.iter() {
            info!("{} = {}", component, value.to_json());
        }
    }
    Ok(())
}
