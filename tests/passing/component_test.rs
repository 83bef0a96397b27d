#![allow(warnings)]

use dirtybit::*;

#[derive(Message, Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Profile {
    pub level: i32,
    pub nick: String,
}

#[derive(Saveable, Debug)]
pub struct ProfileComponent {
    #[component]
    base: BaseComponent,
    #[db(plain)]
    pub profile: MessageData<Profile>,
}

fn main() {
    let registry = SchemaRegistry::new(NamingPolicy::Verbatim);
    let mut entity = BaseEntity::new(1);
    let component = ProfileComponent { base: BaseComponent::new("Profile"), profile: MessageData::default() };
    entity.add_component(&registry, Box::new(component), None).expect("add");
    entity.get_mut::<ProfileComponent>().expect("component").profile.value_mut().level = 2;
    let _ = get_entity_save_data(&registry, &entity).expect("save data");
}
