use sqlx::{Pool, Postgres};

pub mod store;

pub use store::{JsonRow, PgRowStore, RowStore};

pub async fn init_db(database_url: &str) -> Result<Pool<Postgres>, sqlx::Error> {
    let pool = Pool::<Postgres>::connect(database_url).await?;
    Ok(pool)
}

/// Static descriptor of one table the API exposes. All identifiers that ever
/// reach SQL text come from these constants; request input is only ever bound
/// as a parameter.
#[derive(Debug)]
pub struct TableSpec {
    pub table: &'static str,
    pub id_column: &'static str,
    pub columns: &'static [&'static str],
}

impl TableSpec {
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains(&name) || self.id_column == name
    }
}

pub const USUARIOS: TableSpec = TableSpec {
    table: "usuarios",
    id_column: "id_usuario",
    columns: &[
        "id_rol",
        "nombre",
        "apellido",
        "fn",
        "genero",
        "correo",
        "contrasena",
        "activo",
    ],
};

pub const ROLES: TableSpec = TableSpec {
    table: "roles",
    id_column: "id_rol",
    columns: &["nombre_rol", "permisos"],
};

pub const CARGADOR: TableSpec = TableSpec {
    table: "cargador",
    id_column: "id_cargador",
    columns: &["ubicacion", "estado"],
};

pub const MANTENIMIENTOS: TableSpec = TableSpec {
    table: "mantenimientos",
    id_column: "id_historial",
    columns: &["id_cargador", "id_usuario", "fecha", "tipo", "descripcion"],
};

pub const LOGIN: TableSpec = TableSpec {
    table: "login",
    id_column: "id_log",
    columns: &["id_usuario", "accion", "hora"],
};

pub const ENERGIA: TableSpec = TableSpec {
    table: "energia",
    id_column: "id_energia",
    columns: &["voltaje", "corriente"],
};
