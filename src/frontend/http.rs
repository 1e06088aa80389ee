use std::{collections::HashMap, net::SocketAddr};

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::info;
use warp::{hyper::StatusCode, Filter, Reply};

use crate::catalog::schema_engine::{CollectionDraft, FieldDraft, RelationDraft};
use crate::catalog::{CatalogError, ErrorKind};
use crate::config::context::AppContext;
use crate::config::schema::HttpFrontend;
use crate::data_types::CollectionId;
use crate::schema::ItemId;

fn error_response(error: &CatalogError) -> warp::reply::Response {
    let status = match error.kind() {
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Store => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warp::reply::with_status(
        warp::reply::json(&json!({ "error": error.to_string() })),
        status,
    )
    .into_response()
}

fn json_response<T: Serialize>(value: &T, status: StatusCode) -> warp::reply::Response {
    warp::reply::with_status(warp::reply::json(value), status).into_response()
}

fn bad_item_id(raw: &str) -> warp::reply::Response {
    warp::reply::with_status(
        warp::reply::json(&json!({ "error": format!("{raw:?} is not a valid id") })),
        StatusCode::BAD_REQUEST,
    )
    .into_response()
}

// POST /collections
pub fn create_collection(
    context: AppContext,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("collections")
        .and(warp::post())
        .and(warp::body::json())
        .then(move |draft: CollectionDraft| {
            let context = context.clone();
            async move {
                match context.schema.create_collection(&draft).await {
                    Ok(collection) => json_response(&collection, StatusCode::CREATED),
                    Err(error) => error_response(&error),
                }
            }
        })
}

// GET /collections
pub fn list_collections(
    context: AppContext,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("collections").and(warp::get()).then(move || {
        let context = context.clone();
        async move {
            match context.schema.list_collections().await {
                Ok(collections) => json_response(&collections, StatusCode::OK),
                Err(error) => error_response(&error),
            }
        }
    })
}

// POST /collections/[id]/fields
pub fn add_field(
    context: AppContext,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("collections" / CollectionId / "fields")
        .and(warp::post())
        .and(warp::body::json())
        .then(move |collection_id: CollectionId, draft: FieldDraft| {
            let context = context.clone();
            async move {
                match context.schema.add_field(collection_id, &draft).await {
                    Ok(field) => json_response(&field, StatusCode::CREATED),
                    Err(error) => error_response(&error),
                }
            }
        })
}

// GET /collections/[id]/fields
pub fn list_fields(
    context: AppContext,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("collections" / CollectionId / "fields")
        .and(warp::get())
        .then(move |collection_id: CollectionId| {
            let context = context.clone();
            async move {
                match context.schema.fields(collection_id).await {
                    Ok(fields) => json_response(&fields, StatusCode::OK),
                    Err(error) => error_response(&error),
                }
            }
        })
}

// POST /relations
pub fn add_relation(
    context: AppContext,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("relations")
        .and(warp::post())
        .and(warp::body::json())
        .then(move |draft: RelationDraft| {
            let context = context.clone();
            async move {
                match context.schema.add_relation(&draft).await {
                    Ok(relation) => json_response(&relation, StatusCode::CREATED),
                    Err(error) => error_response(&error),
                }
            }
        })
}

// GET /relations
pub fn list_relations(
    context: AppContext,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("relations").and(warp::get()).then(move || {
        let context = context.clone();
        async move {
            match context.schema.list_relations().await {
                Ok(relations) => json_response(&relations, StatusCode::OK),
                Err(error) => error_response(&error),
            }
        }
    })
}

// POST /collections/[id]/items
pub fn create_item(
    context: AppContext,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("collections" / CollectionId / "items")
        .and(warp::post())
        .and(warp::body::json())
        .then(move |collection_id: CollectionId, payload: Map<String, Value>| {
            let context = context.clone();
            async move {
                match context.data.create_item(collection_id, &payload).await {
                    Ok(item) => json_response(&item, StatusCode::CREATED),
                    Err(error) => error_response(&error),
                }
            }
        })
}

// GET /collections/[id]/items?field=value&...
pub fn search_items(
    context: AppContext,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("collections" / CollectionId / "items")
        .and(warp::get())
        .and(warp::query::<HashMap<String, String>>())
        .then(
            move |collection_id: CollectionId, criteria: HashMap<String, String>| {
                let context = context.clone();
                async move {
                    match context.data.search(collection_id, &criteria).await {
                        Ok(items) => json_response(&items, StatusCode::OK),
                        Err(error) => error_response(&error),
                    }
                }
            },
        )
}

// GET /collections/[id]/items/[item id]
pub fn get_item(
    context: AppContext,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("collections" / CollectionId / "items" / String)
        .and(warp::get())
        .then(move |collection_id: CollectionId, raw_id: String| {
            let context = context.clone();
            async move {
                let Some(id) = ItemId::parse(&raw_id) else {
                    return bad_item_id(&raw_id);
                };
                // The engine treats absence as a non-error; HTTP turns it
                // into a 404
                match context.data.find_item(collection_id, &id).await {
                    Ok(Some(item)) => json_response(&item, StatusCode::OK),
                    Ok(None) => error_response(&CatalogError::ItemNotFound {
                        id: id.to_string(),
                    }),
                    Err(error) => error_response(&error),
                }
            }
        })
}

// PUT /collections/[id]/items/[item id]
pub fn update_item(
    context: AppContext,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("collections" / CollectionId / "items" / String)
        .and(warp::put())
        .and(warp::body::json())
        .then(
            move |collection_id: CollectionId,
                  raw_id: String,
                  payload: Map<String, Value>| {
                let context = context.clone();
                async move {
                    let Some(id) = ItemId::parse(&raw_id) else {
                        return bad_item_id(&raw_id);
                    };
                    match context
                        .data
                        .update_item(collection_id, &id, &payload)
                        .await
                    {
                        Ok(Some(item)) => json_response(&item, StatusCode::OK),
                        Ok(None) => error_response(&CatalogError::ItemNotFound {
                            id: id.to_string(),
                        }),
                        Err(error) => error_response(&error),
                    }
                }
            },
        )
}

// DELETE /collections/[id]/items/[item id]
pub fn delete_item(
    context: AppContext,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("collections" / CollectionId / "items" / String)
        .and(warp::delete())
        .then(move |collection_id: CollectionId, raw_id: String| {
            let context = context.clone();
            async move {
                let Some(id) = ItemId::parse(&raw_id) else {
                    return bad_item_id(&raw_id);
                };
                match context.data.delete_item(collection_id, &id).await {
                    Ok(true) => warp::reply::with_status(
                        warp::reply(),
                        StatusCode::NO_CONTENT,
                    )
                    .into_response(),
                    Ok(false) => error_response(&CatalogError::ItemNotFound {
                        id: id.to_string(),
                    }),
                    Err(error) => error_response(&error),
                }
            }
        })
}

pub fn filters(
    context: AppContext,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let cors = warp::cors()
        .allow_any_origin()
        .allow_headers(vec!["Authorization", "Content-Type"])
        .allow_methods(vec!["GET", "POST", "PUT", "DELETE"]);

    get_item(context.clone())
        .or(update_item(context.clone()))
        .or(delete_item(context.clone()))
        .or(create_item(context.clone()))
        .or(search_items(context.clone()))
        .or(add_field(context.clone()))
        .or(list_fields(context.clone()))
        .or(create_collection(context.clone()))
        .or(list_collections(context.clone()))
        .or(add_relation(context.clone()))
        .or(list_relations(context))
        .with(cors)
}

pub async fn run_server(context: AppContext, config: HttpFrontend) {
    let filters = filters(context);

    let socket_addr: SocketAddr = format!("{}:{}", config.bind_host, config.bind_port)
        .parse()
        .expect("Error parsing the listen address");
    info!("HTTP frontend listening on {socket_addr}");
    warp::serve(filters).run(socket_addr).await;
}
