mod food;
mod helpers;
mod meal;
mod recipe;
mod search;

pub(crate) use food::{FoodArgs, cmd_food_add, cmd_food_delete, cmd_food_list};
pub(crate) use meal::{cmd_meal, cmd_quantize};
pub(crate) use recipe::{
    cmd_recipe_add_ingredient, cmd_recipe_create, cmd_recipe_delete, cmd_recipe_list,
    cmd_recipe_remove_ingredient, cmd_recipe_scale, cmd_recipe_set_servings, cmd_recipe_show,
};
pub(crate) use search::{cmd_invalidate, cmd_report, cmd_search, cmd_show, cmd_upload};
