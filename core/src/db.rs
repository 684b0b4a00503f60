use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, params};

use crate::models::{
    EntityKind, FoodItem, IndexSnapshot, Ingredient, Nutrients, Recipe, ServingSize, Visibility,
};

const FOOD_COLUMNS: &str = "f.id, f.name, f.brand, f.calories, f.carbohydrates, f.protein, f.fat,
     f.servings, f.serving_size, f.source, f.created_at, f.updated_at";

const RECIPE_COLUMNS: &str = "id, name, calories, carbohydrates, protein, fat, servings,
     instructions, visibility, soft_deleted, created_at, updated_at";

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS food_items (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    brand TEXT,
                    calories REAL NOT NULL,
                    carbohydrates REAL NOT NULL,
                    protein REAL NOT NULL,
                    fat REAL NOT NULL,
                    servings INTEGER NOT NULL CHECK (servings >= 1),
                    serving_size TEXT NOT NULL,
                    source TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS recipes (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    calories REAL NOT NULL,
                    carbohydrates REAL NOT NULL,
                    protein REAL NOT NULL,
                    fat REAL NOT NULL,
                    servings REAL NOT NULL CHECK (servings > 0),
                    instructions TEXT NOT NULL DEFAULT '',
                    visibility TEXT NOT NULL,
                    soft_deleted INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS ingredients (
                    recipe_id TEXT NOT NULL REFERENCES recipes(id) ON DELETE CASCADE,
                    food_item_id TEXT NOT NULL REFERENCES food_items(id),
                    position INTEGER NOT NULL,
                    quantity_g REAL NOT NULL CHECK (quantity_g > 0),
                    servings INTEGER NOT NULL,
                    serving_size TEXT NOT NULL,
                    PRIMARY KEY (recipe_id, food_item_id)
                );

                CREATE TABLE IF NOT EXISTS search_queries (
                    query TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    refreshed_at TEXT NOT NULL,
                    PRIMARY KEY (query, kind)
                );

                CREATE TABLE IF NOT EXISTS search_entries (
                    query TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    entity_id TEXT NOT NULL,
                    position INTEGER NOT NULL,
                    PRIMARY KEY (query, kind, entity_id),
                    FOREIGN KEY (query, kind) REFERENCES search_queries(query, kind) ON DELETE CASCADE
                );

                CREATE INDEX IF NOT EXISTS idx_food_items_name ON food_items(name);
                CREATE INDEX IF NOT EXISTS idx_recipes_name ON recipes(name);
                CREATE INDEX IF NOT EXISTS idx_ingredients_food ON ingredients(food_item_id);

                PRAGMA user_version = 1;",
            )?;
        }

        Ok(())
    }

    // --- Row mapping helpers ---

    // Expects FOOD_COLUMNS starting at `base`
    fn food_at(row: &rusqlite::Row, base: usize) -> rusqlite::Result<FoodItem> {
        Ok(FoodItem {
            id: row.get(base)?,
            name: row.get(base + 1)?,
            brand: row.get(base + 2)?,
            nutrients: Nutrients::new(
                row.get(base + 3)?,
                row.get(base + 4)?,
                row.get(base + 5)?,
                row.get(base + 6)?,
            ),
            servings: row.get(base + 7)?,
            serving_size: parse_column(row, base + 8)?,
            source: row.get(base + 9)?,
            created_at: row.get(base + 10)?,
            updated_at: row.get(base + 11)?,
        })
    }

    fn food_from_row(row: &rusqlite::Row) -> rusqlite::Result<FoodItem> {
        Self::food_at(row, 0)
    }

    // Ingredients come back without their lines; `get_recipe` fills them in.
    fn recipe_from_row(row: &rusqlite::Row) -> rusqlite::Result<Recipe> {
        Ok(Recipe {
            id: row.get(0)?,
            name: row.get(1)?,
            nutrients: Nutrients::new(row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?),
            servings: row.get(6)?,
            ingredients: Vec::new(),
            instructions: row.get(7)?,
            visibility: parse_column(row, 8)?,
            soft_deleted: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }

    // --- Foods ---

    pub fn insert_food(&self, food: &FoodItem) -> Result<()> {
        let (created_at, updated_at) = stamps(&food.created_at, &food.updated_at);
        self.conn
            .execute(
                "INSERT INTO food_items (id, name, brand, calories, carbohydrates, protein, fat, servings, serving_size, source, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    food.id,
                    food.name,
                    food.brand,
                    food.nutrients.calories,
                    food.nutrients.carbohydrates,
                    food.nutrients.protein,
                    food.nutrients.fat,
                    food.servings,
                    food.serving_size.as_str(),
                    food.source,
                    created_at,
                    updated_at,
                ],
            )
            .with_context(|| format!("Failed to insert food '{}'", food.id))?;
        Ok(())
    }

    /// Returns `false` when a food with the same id already exists; the stored
    /// row is left as it was.
    pub fn insert_food_if_absent(&self, food: &FoodItem) -> Result<bool> {
        let (created_at, updated_at) = stamps(&food.created_at, &food.updated_at);
        let rows = self.conn.execute(
            "INSERT OR IGNORE INTO food_items (id, name, brand, calories, carbohydrates, protein, fat, servings, serving_size, source, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                food.id,
                food.name,
                food.brand,
                food.nutrients.calories,
                food.nutrients.carbohydrates,
                food.nutrients.protein,
                food.nutrients.fat,
                food.servings,
                food.serving_size.as_str(),
                food.source,
                created_at,
                updated_at,
            ],
        )?;
        Ok(rows > 0)
    }

    pub fn update_food(&self, food: &FoodItem) -> Result<bool> {
        let now = Local::now().to_rfc3339();
        let rows = self.conn.execute(
            "UPDATE food_items SET name = ?1, brand = ?2, calories = ?3, carbohydrates = ?4,
             protein = ?5, fat = ?6, servings = ?7, serving_size = ?8, source = ?9, updated_at = ?10
             WHERE id = ?11",
            params![
                food.name,
                food.brand,
                food.nutrients.calories,
                food.nutrients.carbohydrates,
                food.nutrients.protein,
                food.nutrients.fat,
                food.servings,
                food.serving_size.as_str(),
                food.source,
                now,
                food.id,
            ],
        )?;
        Ok(rows > 0)
    }

    pub fn get_food(&self, id: &str) -> Result<Option<FoodItem>> {
        self.conn
            .query_row(
                &format!("SELECT {FOOD_COLUMNS} FROM food_items f WHERE f.id = ?1"),
                params![id],
                Self::food_from_row,
            )
            .optional()
            .with_context(|| format!("Failed to load food '{id}'"))
    }

    pub fn food_exists(&self, id: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM food_items WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn list_foods(&self) -> Result<Vec<FoodItem>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {FOOD_COLUMNS} FROM food_items f ORDER BY f.name COLLATE NOCASE, f.id"
        ))?;
        let foods = stmt
            .query_map([], Self::food_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(foods)
    }

    pub fn delete_food(&self, id: &str) -> Result<bool> {
        let used_by: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM ingredients WHERE food_item_id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        if used_by > 0 {
            anyhow::bail!("Food '{id}' is used by {used_by} recipe ingredient(s)");
        }
        let rows = self
            .conn
            .execute("DELETE FROM food_items WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // --- Recipes ---

    pub fn insert_recipe(&self, recipe: &Recipe) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        insert_recipe_row(&tx, recipe, false)
            .with_context(|| format!("Failed to insert recipe '{}'", recipe.id))?;
        write_ingredients(&tx, recipe)?;
        tx.commit()?;
        Ok(())
    }

    /// Insert the recipe and its lines unless one with the same id exists.
    pub fn insert_recipe_if_absent(&self, recipe: &Recipe) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        if insert_recipe_row(&tx, recipe, true)? == 0 {
            return Ok(false);
        }
        write_ingredients(&tx, recipe)?;
        tx.commit()?;
        Ok(true)
    }

    /// Replace the recipe row and all of its ingredient lines.
    pub fn update_recipe(&self, recipe: &Recipe) -> Result<bool> {
        let now = Local::now().to_rfc3339();
        let tx = self.conn.unchecked_transaction()?;
        let rows = tx.execute(
            "UPDATE recipes SET name = ?1, calories = ?2, carbohydrates = ?3, protein = ?4,
             fat = ?5, servings = ?6, instructions = ?7, visibility = ?8, soft_deleted = ?9,
             updated_at = ?10 WHERE id = ?11",
            params![
                recipe.name,
                recipe.nutrients.calories,
                recipe.nutrients.carbohydrates,
                recipe.nutrients.protein,
                recipe.nutrients.fat,
                recipe.servings,
                recipe.instructions,
                recipe.visibility.as_str(),
                recipe.soft_deleted,
                now,
                recipe.id,
            ],
        )?;
        if rows == 0 {
            return Ok(false);
        }
        tx.execute(
            "DELETE FROM ingredients WHERE recipe_id = ?1",
            params![recipe.id],
        )?;
        write_ingredients(&tx, recipe)?;
        tx.commit()?;
        Ok(true)
    }

    pub fn get_recipe(&self, id: &str) -> Result<Option<Recipe>> {
        let recipe = self
            .conn
            .query_row(
                &format!("SELECT {RECIPE_COLUMNS} FROM recipes WHERE id = ?1"),
                params![id],
                Self::recipe_from_row,
            )
            .optional()
            .with_context(|| format!("Failed to load recipe '{id}'"))?;
        let Some(mut recipe) = recipe else {
            return Ok(None);
        };
        recipe.ingredients = self.get_ingredients(id)?;
        Ok(Some(recipe))
    }

    pub fn recipe_exists(&self, id: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM recipes WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Soft-deleted recipes are never listed.
    pub fn list_recipes(&self, visibility: Option<Visibility>) -> Result<Vec<Recipe>> {
        let mut stmt = self.conn.prepare(
            "SELECT id FROM recipes
             WHERE soft_deleted = 0 AND (?1 IS NULL OR visibility = ?1)
             ORDER BY name COLLATE NOCASE, id",
        )?;
        let ids: Vec<String> = stmt
            .query_map(params![visibility.map(Visibility::as_str)], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        let mut recipes = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(recipe) = self.get_recipe(&id)? {
                recipes.push(recipe);
            }
        }
        Ok(recipes)
    }

    pub fn delete_recipe(&self, id: &str) -> Result<bool> {
        // Ingredients go with it (ON DELETE CASCADE)
        let rows = self
            .conn
            .execute("DELETE FROM recipes WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // --- Ingredients ---

    pub fn get_ingredients(&self, recipe_id: &str) -> Result<Vec<Ingredient>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT i.recipe_id, i.food_item_id, i.quantity_g, i.servings, i.serving_size, {FOOD_COLUMNS}
             FROM ingredients i
             JOIN food_items f ON f.id = i.food_item_id
             WHERE i.recipe_id = ?1
             ORDER BY i.position"
        ))?;
        let ingredients = stmt
            .query_map(params![recipe_id], |row| {
                Ok(Ingredient {
                    recipe_id: row.get(0)?,
                    food_item_id: row.get(1)?,
                    quantity_g: row.get(2)?,
                    servings: row.get(3)?,
                    serving_size: parse_column(row, 4)?,
                    food: Some(Self::food_at(row, 5)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ingredients)
    }

    // --- Search index ---

    /// `None` when the query was never indexed for this kind.
    pub fn index_snapshot(&self, query: &str, kind: EntityKind) -> Result<Option<IndexSnapshot>> {
        let refreshed_at: Option<String> = self
            .conn
            .query_row(
                "SELECT refreshed_at FROM search_queries WHERE query = ?1 AND kind = ?2",
                params![query, kind.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(refreshed_at) = refreshed_at else {
            return Ok(None);
        };
        let refreshed_at = DateTime::parse_from_rfc3339(&refreshed_at)
            .with_context(|| format!("Invalid refresh stamp '{refreshed_at}' for '{query}'"))?
            .with_timezone(&Utc);

        let mut stmt = self.conn.prepare(
            "SELECT entity_id FROM search_entries
             WHERE query = ?1 AND kind = ?2
             ORDER BY position",
        )?;
        let entity_ids = stmt
            .query_map(params![query, kind.as_str()], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;

        Ok(Some(IndexSnapshot {
            query: query.to_string(),
            kind,
            refreshed_at,
            entity_ids,
        }))
    }

    /// Drop every entry for `(query, kind)` and write `entity_ids` stamped with
    /// `refreshed_at`, atomically.
    pub fn replace_index_entries(
        &self,
        query: &str,
        kind: EntityKind,
        entity_ids: &[String],
        refreshed_at: DateTime<Utc>,
    ) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM search_entries WHERE query = ?1 AND kind = ?2",
            params![query, kind.as_str()],
        )?;
        tx.execute(
            "INSERT INTO search_queries (query, kind, refreshed_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(query, kind) DO UPDATE SET refreshed_at = excluded.refreshed_at",
            params![query, kind.as_str(), refreshed_at.to_rfc3339()],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO search_entries (query, kind, entity_id, position)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (position, id) in entity_ids.iter().enumerate() {
                stmt.execute(params![query, kind.as_str(), id, position])?;
            }
        }
        tx.commit()
            .with_context(|| format!("Failed to replace index entries for '{query}'"))?;
        Ok(())
    }

    pub fn invalidate_index(&self, query: &str, kind: EntityKind) -> Result<bool> {
        self.conn.execute(
            "DELETE FROM search_entries WHERE query = ?1 AND kind = ?2",
            params![query, kind.as_str()],
        )?;
        let rows = self.conn.execute(
            "DELETE FROM search_queries WHERE query = ?1 AND kind = ?2",
            params![query, kind.as_str()],
        )?;
        Ok(rows > 0)
    }
}

fn stamps(created_at: &str, updated_at: &str) -> (String, String) {
    let now = Local::now().to_rfc3339();
    let created = if created_at.is_empty() {
        now.clone()
    } else {
        created_at.to_string()
    };
    let updated = if updated_at.is_empty() {
        now
    } else {
        updated_at.to_string()
    };
    (created, updated)
}

fn parse_column<T>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn insert_recipe_row(conn: &Connection, recipe: &Recipe, or_ignore: bool) -> Result<usize> {
    let (created_at, updated_at) = stamps(&recipe.created_at, &recipe.updated_at);
    let verb = if or_ignore {
        "INSERT OR IGNORE"
    } else {
        "INSERT"
    };
    let rows = conn.execute(
        &format!(
            "{verb} INTO recipes (id, name, calories, carbohydrates, protein, fat, servings, instructions, visibility, soft_deleted, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
        ),
        params![
            recipe.id,
            recipe.name,
            recipe.nutrients.calories,
            recipe.nutrients.carbohydrates,
            recipe.nutrients.protein,
            recipe.nutrients.fat,
            recipe.servings,
            recipe.instructions,
            recipe.visibility.as_str(),
            recipe.soft_deleted,
            created_at,
            updated_at,
        ],
    )?;
    Ok(rows)
}

// A repeated food in one recipe keeps its first position and the last quantity.
fn write_ingredients(conn: &Connection, recipe: &Recipe) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO ingredients (recipe_id, food_item_id, position, quantity_g, servings, serving_size)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(recipe_id, food_item_id) DO UPDATE SET
            quantity_g = excluded.quantity_g,
            servings = excluded.servings,
            serving_size = excluded.serving_size",
    )?;
    for (position, ingredient) in recipe.ingredients.iter().enumerate() {
        stmt.execute(params![
            recipe.id,
            ingredient.food_item_id,
            position,
            ingredient.quantity_g,
            ingredient.servings,
            ingredient.serving_size.as_str(),
        ])
        .with_context(|| {
            format!(
                "Failed to add ingredient '{}' to recipe '{}'",
                ingredient.food_item_id, recipe.id
            )
        })?;
    }
    Ok(())
}
