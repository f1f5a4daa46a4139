//! Page dispatcher: compiled page + model + parameters → markup.
//!
//! Render context layout:
//!
//! | Key            | Value                                             |
//! |----------------|---------------------------------------------------|
//! | `plugins`      | every record, in file order                       |
//! | `featured`     | the featured records                              |
//! | `byId`         | id → record                                       |
//! | `tags`         | tag → records                                     |
//! | `validation`   | `errors`, `warnings`, `count`, `hasErrors`, ...   |
//! | `site`         | `title`, `version`                                |
//! | `params`       | every bound parameter                             |
//! | `<param>`      | each declared parameter, by name                  |
//! | `location`     | resolved location value, or `null`                |

use crate::{
    catalog::{Model, ModelHandle},
    compiler::{CompiledPage, LocationKind, PageCache},
    error::PageError,
    route::RouteTable,
};
use serde_json::{Value, json};
use std::{
    any::Any,
    panic::{AssertUnwindSafe, catch_unwind},
};

/// Render `page` against `model`. Panics in the entry point are caught.
pub fn render(page: &CompiledPage, model: &Model) -> Result<String, PageError> {
    let context = build_context(page, model)?;

    match catch_unwind(AssertUnwindSafe(|| page.render(&context))) {
        Ok(Ok(markup)) => Ok(markup),
        Ok(Err(message)) => Err(PageError::Render {
            page: page.name().to_owned(),
            message,
        }),
        Err(payload) => Err(PageError::Render {
            page: page.name().to_owned(),
            message: format!("panicked: {}", panic_message(payload.as_ref())),
        }),
    }
}

/// Serve a request path: route it, bind its parameters, render.
pub async fn render_path(
    routes: &RouteTable,
    cache: &PageCache,
    models: &ModelHandle,
    path: &str,
) -> Result<String, PageError> {
    let (page, params) = routes.dispatch(cache, path).await?;
    let model = models.model().with_params(params);
    render(&page, &model)
}

const DOCTYPE: &str = "<!DOCTYPE html>\n";

/// Prefix `<!DOCTYPE html>` unless the page already declares one.
pub fn with_doctype(markup: String) -> String {
    let declared = markup
        .trim_start()
        .get(..9)
        .is_some_and(|head| head.eq_ignore_ascii_case("<!doctype"));
    if declared {
        markup
    } else {
        format!("{DOCTYPE}{markup}")
    }
}

fn build_context(page: &CompiledPage, model: &Model) -> Result<Value, PageError> {
    let location = page
        .location()
        .map(|kind| resolve_location(kind, model))
        .transpose()?;

    let mut context = model.catalog().context().clone();
    context.insert("params".into(), json!(model.params()));
    for name in page.params() {
        if let Some(value) = model.params().get(name) {
            context.insert(name.clone(), Value::String(value.clone()));
        }
    }
    context.insert("location".into(), location.unwrap_or(Value::Null));

    Ok(Value::Object(context))
}

fn resolve_location(kind: LocationKind, model: &Model) -> Result<Value, PageError> {
    let key = model
        .params()
        .get(kind.param())
        .ok_or_else(|| PageError::NotFound(format!("missing `{}` parameter", kind.param())))?;
    let catalog = model.catalog();

    match kind {
        LocationKind::Plugin => catalog
            .plugin(key)
            .map(|plugin| json!(plugin))
            .ok_or_else(|| PageError::NotFound(format!("plugin `{key}`"))),
        LocationKind::Tag => {
            let plugins = catalog.tagged(key);
            if plugins.is_empty() {
                return Err(PageError::NotFound(format!("tag `{key}`")));
            }
            Ok(json!({ "tag": key, "plugins": plugins }))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
