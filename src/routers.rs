use std::convert::Infallible;

use sqlx::PgPool;
use warp::{Filter, Rejection, Reply};

use crate::db::{self, JsonRow, PgRowStore, TableSpec};
use crate::error;
use crate::handlers;
use crate::ingest;

const MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

fn with_store(store: PgRowStore) -> impl Filter<Extract = (PgRowStore,), Error = Infallible> + Clone {
    warp::any().map(move || store.clone())
}

/// The whole route tree: CRUD per resource, the four spreadsheet uploads,
/// and the telemetry endpoints, with broad CORS and JSON error recovery.
pub fn make_routes(pool: PgPool) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let store = PgRowStore::new(pool);

    let users = crud_routes("users", &db::USUARIOS, store.clone())
        .or(create_route("users", &db::USUARIOS, store.clone()))
        .or(warp::path("users")
            .and(warp::path("correo"))
            .and(warp::path::param::<String>())
            .and(warp::path::end())
            .and(warp::get())
            .and(with_store(store.clone()))
            .and_then(handlers::get_user_by_email));

    let roles = crud_routes("roles", &db::ROLES, store.clone())
        .or(create_route("roles", &db::ROLES, store.clone()));

    let chargers = crud_routes("chargers", &db::CARGADOR, store.clone())
        .or(create_route("chargers", &db::CARGADOR, store.clone()));

    let maintenance = crud_routes("maintenance", &db::MANTENIMIENTOS, store.clone())
        .or(create_route("maintenance", &db::MANTENIMIENTOS, store.clone()));

    // login creation carries its own field validation
    let logins = crud_routes("logins", &db::LOGIN, store.clone()).or(warp::path("logins")
        .and(warp::path::end())
        .and(warp::post())
        .and(with_store(store.clone()))
        .and(warp::body::json::<JsonRow>())
        .and_then(handlers::create_login));

    let uploads = excel_route("subir-excel", &ingest::USER_SCHEMA, store.clone())
        .or(excel_route("role-excel", &ingest::ROLE_SCHEMA, store.clone()))
        .or(excel_route("charger-excel", &ingest::CHARGER_SCHEMA, store.clone()))
        .or(excel_route("maintenance-excel", &ingest::MAINTENANCE_SCHEMA, store.clone()));

    let save_energy = warp::path("api")
        .and(warp::path("voltaje"))
        .and(warp::path::end())
        .and(warp::post())
        .and(with_store(store.clone()))
        .and(warp::body::json())
        .and_then(handlers::save_energy);

    let list_energy = warp::path("get")
        .and(warp::path("voltaje"))
        .and(warp::path::end())
        .and(warp::get())
        .and(with_store(store))
        .and_then(|store| handlers::list_rows(&db::ENERGIA, store));

    let cors = warp::cors()
        .allow_any_origin()
        .allow_methods(vec!["GET", "POST", "PUT", "DELETE"])
        .allow_headers(vec!["content-type", "authorization"]);

    users
        .or(roles)
        .or(chargers)
        .or(maintenance)
        .or(logins)
        .or(uploads)
        .or(save_energy)
        .or(list_energy)
        .recover(error::handle_rejection)
        .with(cors)
}

/// GET all, GET by id, PUT by id, DELETE by id for one resource. POST is a
/// separate filter so resources with extra create-time validation can swap
/// theirs in.
fn crud_routes(
    name: &'static str,
    spec: &'static TableSpec,
    store: PgRowStore,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let list = warp::path(name)
        .and(warp::path::end())
        .and(warp::get())
        .and(with_store(store.clone()))
        .and_then(move |store| handlers::list_rows(spec, store));

    let get_by_id = warp::path(name)
        .and(warp::path("id"))
        .and(warp::path::param::<i64>())
        .and(warp::path::end())
        .and(warp::get())
        .and(with_store(store.clone()))
        .and_then(move |id, store| handlers::get_row_by_id(spec, id, store));

    let update = warp::path(name)
        .and(warp::path("id"))
        .and(warp::path::param::<i64>())
        .and(warp::path::end())
        .and(warp::put())
        .and(with_store(store.clone()))
        .and(warp::body::json::<JsonRow>())
        .and_then(move |id, store, body| handlers::update_row(spec, id, store, body));

    let delete = warp::path(name)
        .and(warp::path("id"))
        .and(warp::path::param::<i64>())
        .and(warp::path::end())
        .and(warp::delete())
        .and(with_store(store))
        .and_then(move |id, store| handlers::delete_row(spec, id, store));

    list.or(get_by_id).or(update).or(delete)
}

fn create_route(
    name: &'static str,
    spec: &'static TableSpec,
    store: PgRowStore,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path(name)
        .and(warp::path::end())
        .and(warp::post())
        .and(with_store(store))
        .and(warp::body::json::<JsonRow>())
        .and_then(move |store, body| handlers::create_row(spec, store, body))
}

fn excel_route(
    path: &'static str,
    schema: &'static ingest::EntitySchema,
    store: PgRowStore,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path(path)
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::multipart::form().max_length(MAX_UPLOAD_BYTES))
        .and(with_store(store))
        .and_then(move |form, store| handlers::upload_excel(schema, store, form))
}
