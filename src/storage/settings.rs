use entities::setting;
use sea_orm::{
    ActiveValue::Set, ConnectionTrait, EntityTrait,
    sea_query::OnConflict,
};

use crate::error::Result;

pub async fn get<C: ConnectionTrait>(db: &C, key: &str) -> Result<Option<String>> {
    Ok(setting::Entity::find_by_id(key.to_string())
        .one(db)
        .await?
        .map(|row| row.value))
}

pub async fn set<C: ConnectionTrait>(db: &C, key: &str, value: &str) -> Result<()> {
    let model = setting::ActiveModel {
        key: Set(key.to_string()),
        value: Set(value.to_string()),
    };
    setting::Entity::insert(model)
        .on_conflict(
            OnConflict::column(setting::Column::Key)
                .update_column(setting::Column::Value)
                .to_owned(),
        )
        .exec(db)
        .await?;
    Ok(())
}
