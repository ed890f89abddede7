mod database;
mod flash;
mod model;

use actix_identity::{CookieIdentityPolicy, Identity, IdentityService};
use actix_web::{error, middleware::Logger, web, App, HttpRequest, HttpResponse, HttpServer};
use clap::{Parser, Subcommand};
use database::*;
use flash::Notice;
use log::debug;
use model::*;
use serde::{Deserialize, Serialize};

type Tera = web::Data<tera::Tera>;
type Db = web::Data<sled::Db>;

fn log_error<E: std::fmt::Debug>(err: E, message: &'static str) -> error::Error {
    debug!("{:?}", err);
    error::ErrorInternalServerError(message)
}

fn auth_user_id(id: &Identity) -> Option<u64> {
    id.identity()?.parse().ok()
}

// Length caps count characters, not bytes; empty input is always rejected.
fn within(value: &str, max: usize) -> bool {
    let len = value.chars().count();
    len >= 1 && len <= max
}

fn valid_movie(title: &str, year: &str) -> bool {
    within(title, 60) && within(year, 4)
}

/// Renders a view with the shared context every page gets: the first
/// user (the single tenant), the login state, and any queued notice.
fn render_view(
    req: &HttpRequest,
    id: &Identity,
    tera: &tera::Tera,
    db: &sled::Db,
    mut builder: actix_web::dev::HttpResponseBuilder,
    view: &str,
    ctx: &mut tera::Context,
) -> actix_web::Result<HttpResponse> {
    let user = db
        .first_user()
        .map_err(|err| log_error(err, "Database error"))?
        .map(|(_, user)| user);
    ctx.insert("user", &user);
    ctx.insert("logged_in", &auth_user_id(id).is_some());
    builder.content_type("text/html");
    if let Some(message) = flash::take(req, &mut builder) {
        ctx.insert("message", message);
    }
    let body = tera
        .render(view, ctx)
        .map_err(|err| log_error(err, "Template error"))?;
    Ok(builder.body(body))
}

fn not_found_page(
    req: &HttpRequest,
    id: &Identity,
    tera: &tera::Tera,
    db: &sled::Db,
) -> actix_web::Result<HttpResponse> {
    let mut ctx = tera::Context::new();
    render_view(
        req,
        id,
        tera,
        db,
        HttpResponse::NotFound(),
        "404.html",
        &mut ctx,
    )
}

#[derive(Serialize)]
struct MovieRow {
    id: u64,
    title: String,
    year: String,
}

impl MovieRow {
    fn new(id: u64, movie: Movie) -> MovieRow {
        MovieRow {
            id,
            title: movie.title,
            year: movie.year,
        }
    }
}

async fn index(
    req: HttpRequest,
    id: Identity,
    tera: Tera,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    let movies = db
        .list_movies()
        .map_err(|err| log_error(err, "Database error"))?
        .into_iter()
        .map(|(movie_id, movie)| MovieRow::new(movie_id, movie))
        .collect::<Vec<_>>();
    let mut ctx = tera::Context::new();
    ctx.insert("movies", &movies);
    render_view(&req, &id, &tera, &db, HttpResponse::Ok(), "index.html", &mut ctx)
}

#[derive(Deserialize)]
struct MovieForm {
    title: String,
    year: String,
}

async fn create(
    params: web::Form<MovieForm>,
    id: Identity,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    if auth_user_id(&id).is_none() {
        return Ok(flash::redirect("/"));
    }
    let params = params.into_inner();
    if !valid_movie(&params.title, &params.year) {
        return Ok(flash::redirect_with("/", Notice::InvalidInput));
    }
    db.create_movie(&Movie {
        title: params.title,
        year: params.year,
    })
    .map_err(|err| log_error(err, "Database error"))?;
    Ok(flash::redirect_with("/", Notice::ItemCreated))
}

async fn login(
    req: HttpRequest,
    id: Identity,
    tera: Tera,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    let mut ctx = tera::Context::new();
    render_view(&req, &id, &tera, &db, HttpResponse::Ok(), "login.html", &mut ctx)
}

#[derive(Deserialize)]
struct LoginForm {
    username: String,
    password: String,
}

async fn login_post(
    params: web::Form<LoginForm>,
    id: Identity,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    let params = params.into_inner();
    if params.username.is_empty() || params.password.is_empty() {
        return Ok(flash::redirect_with("/login", Notice::InvalidInput));
    }
    // Single-tenant: login always compares against the one stored identity.
    if let Some((user_id, user)) = db
        .first_user()
        .map_err(|err| log_error(err, "Database error"))?
    {
        // Verify unconditionally so a wrong username costs the same as a
        // wrong password.
        let username_ok = params.username == user.username;
        let password_ok = bcrypt::verify(&params.password, &user.password_hash)
            .map_err(|err| log_error(err, "Verification error"))?;
        if username_ok && password_ok {
            id.remember(user_id.to_string());
            return Ok(flash::redirect_with("/", Notice::LoginSuccess));
        }
    }
    // Generic on purpose: never disclose which field was wrong.
    Ok(flash::redirect_with("/login", Notice::BadCredentials))
}

async fn logout(id: Identity) -> actix_web::Result<HttpResponse> {
    if auth_user_id(&id).is_none() {
        return Ok(flash::redirect("/login"));
    }
    id.forget();
    Ok(flash::redirect_with("/", Notice::Goodbye))
}

async fn settings(
    req: HttpRequest,
    id: Identity,
    tera: Tera,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    let mut ctx = tera::Context::new();
    render_view(&req, &id, &tera, &db, HttpResponse::Ok(), "settings.html", &mut ctx)
}

#[derive(Deserialize)]
struct SettingsForm {
    name: String,
}

async fn settings_post(
    params: web::Form<SettingsForm>,
    id: Identity,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    let user_id = match auth_user_id(&id) {
        Some(user_id) => user_id,
        None => return Ok(flash::redirect("/login")),
    };
    let name = params.into_inner().name;
    if !within(&name, 20) {
        return Ok(flash::redirect_with("/settings", Notice::InvalidInput));
    }
    match db
        .get_user(user_id)
        .map_err(|err| log_error(err, "Database error"))?
    {
        Some(mut user) => {
            user.name = name;
            db.update_user(user_id, &user)
                .map_err(|err| log_error(err, "Database error"))?;
            Ok(flash::redirect_with("/", Notice::SettingUpdated))
        }
        // Stale session pointing at a deleted user.
        None => Ok(flash::redirect("/login")),
    }
}

async fn edit(
    req: HttpRequest,
    path: web::Path<u64>,
    id: Identity,
    tera: Tera,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    if auth_user_id(&id).is_none() {
        return Ok(flash::redirect("/login"));
    }
    let movie_id = path.into_inner();
    match db
        .get_movie(movie_id)
        .map_err(|err| log_error(err, "Database error"))?
    {
        Some(movie) => {
            let mut ctx = tera::Context::new();
            ctx.insert("movie", &MovieRow::new(movie_id, movie));
            render_view(&req, &id, &tera, &db, HttpResponse::Ok(), "edit.html", &mut ctx)
        }
        None => not_found_page(&req, &id, &tera, &db),
    }
}

async fn edit_post(
    req: HttpRequest,
    path: web::Path<u64>,
    params: web::Form<MovieForm>,
    id: Identity,
    tera: Tera,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    if auth_user_id(&id).is_none() {
        return Ok(flash::redirect("/login"));
    }
    let movie_id = path.into_inner();
    if db
        .get_movie(movie_id)
        .map_err(|err| log_error(err, "Database error"))?
        .is_none()
    {
        return not_found_page(&req, &id, &tera, &db);
    }
    let params = params.into_inner();
    if !valid_movie(&params.title, &params.year) {
        return Ok(flash::redirect_with(
            &format!("/movie/edit/{}", movie_id),
            Notice::InvalidInput,
        ));
    }
    let updated = db
        .update_movie(
            movie_id,
            &Movie {
                title: params.title,
                year: params.year,
            },
        )
        .map_err(|err| log_error(err, "Database error"))?;
    match updated {
        Some(()) => Ok(flash::redirect_with("/", Notice::ItemUpdated)),
        // The row vanished between the check and the write.
        None => not_found_page(&req, &id, &tera, &db),
    }
}

async fn delete(
    req: HttpRequest,
    path: web::Path<u64>,
    id: Identity,
    tera: Tera,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    if auth_user_id(&id).is_none() {
        return Ok(flash::redirect("/login"));
    }
    let deleted = db
        .delete_movie(path.into_inner())
        .map_err(|err| log_error(err, "Database error"))?;
    match deleted {
        Some(_) => Ok(flash::redirect_with("/", Notice::ItemDeleted)),
        None => not_found_page(&req, &id, &tera, &db),
    }
}

async fn not_found(
    req: HttpRequest,
    id: Identity,
    tera: Tera,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    not_found_page(&req, &id, &tera, &db)
}

fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(index))
        .route("/", web::post().to(create))
        .route("/login", web::get().to(login))
        .route("/login", web::post().to(login_post))
        .route("/logout", web::get().to(logout))
        .route("/settings", web::get().to(settings))
        .route("/settings", web::post().to(settings_post))
        .route("/movie/edit/{id}", web::get().to(edit))
        .route("/movie/edit/{id}", web::post().to(edit_post))
        .route("/movie/delete/{id}", web::post().to(delete));
}

#[derive(Parser)]
#[command(name = "watchlist", about = "Single-tenant movie watchlist")]
struct Cli {
    /// Path of the database directory.
    #[arg(long, default_value = "data.db")]
    database: std::path::PathBuf,
    /// Address the HTTP server binds to.
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: String,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Create the schema.
    Initdb {
        /// Create after drop.
        #[arg(long)]
        drop: bool,
    },
    /// Create or replace the admin identity used to log in.
    Admin {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
    },
}

fn into_io<E: std::error::Error + Send + Sync + 'static>(err: E) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, err)
}

#[actix_rt::main]
async fn main() -> std::io::Result<()> {
    std::env::set_var("RUST_LOG", "watchlist=debug,actix_web=info");
    env_logger::init();

    let cli = Cli::parse();
    let db = sled::open(&cli.database).map_err(into_io)?;

    match cli.command {
        Some(Command::Initdb { drop }) => {
            if drop {
                drop_schema(&db).map_err(into_io)?;
            }
            init_schema(&db).map_err(into_io)?;
            println!("Initialized database.");
            Ok(())
        }
        Some(Command::Admin { username, password }) => {
            let password_hash =
                bcrypt::hash(&password, bcrypt::DEFAULT_COST).map_err(into_io)?;
            match db.first_user().map_err(into_io)? {
                Some((user_id, user)) => {
                    db.update_user(
                        user_id,
                        &User {
                            username,
                            password_hash,
                            ..user
                        },
                    )
                    .map_err(into_io)?;
                    println!("Admin updated.");
                }
                None => {
                    db.create_user(&User {
                        name: String::new(),
                        username,
                        password_hash,
                    })
                    .map_err(into_io)?;
                    println!("Admin created.");
                }
            }
            Ok(())
        }
        None => {
            init_schema(&db).map_err(into_io)?;
            // Fixed dev key; rotate for real use.
            let private_key = [0u8; 32];
            HttpServer::new(move || {
                let tera =
                    tera::Tera::new(concat!(env!("CARGO_MANIFEST_DIR"), "/templates/**/*"))
                        .unwrap();
                App::new()
                    .wrap(Logger::default())
                    .wrap(IdentityService::new(
                        CookieIdentityPolicy::new(&private_key)
                            .name("auth-cookie")
                            .secure(false),
                    ))
                    .data(tera)
                    .data(db.clone())
                    .configure(routes)
                    .default_service(web::route().to(not_found))
            })
            .bind(&cli.bind)?
            .run()
            .await
        }
    }
}
