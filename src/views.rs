use crate::auth::{self, AuthError, SessionState};
use crate::catalog::*;
use crate::model::*;
use actix_identity::Identity;
use actix_web::error::BlockingError;
use actix_web::{error, web, HttpResponse};
use futures::future::try_join_all;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use url::form_urlencoded;

type Tera = web::Data<tera::Tera>;
type Db = web::Data<sled::Db>;
type Catalog = web::Data<TmdbClient>;

const PLACEHOLDER_SVG: &str = include_str!("../static/placeholder.svg");

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(index))
        .route("/movie/{id}", web::get().to(movie))
        .route("/movie/{id}/favorite", web::post().to(favorite))
        .route("/profile", web::get().to(profile))
        .route("/login", web::get().to(login))
        .route("/login", web::post().to(login_post))
        .route("/register", web::get().to(register))
        .route("/register", web::post().to(register_post))
        .route("/logout", web::get().to(logout))
        .route("/placeholder.svg", web::get().to(placeholder));
}

fn log_error<E: std::fmt::Debug>(err: E, message: &'static str) -> error::Error {
    debug!("{:?}", err);
    error::ErrorInternalServerError(message)
}

fn redirect(location: &str) -> HttpResponse {
    HttpResponse::Found().header("location", location).finish()
}

fn render(tera: &tera::Tera, template: &str, ctx: &tera::Context) -> actix_web::Result<String> {
    tera.render(template, ctx)
        .map_err(|err| log_error(err, "Template error"))
}

/// Runs a catalog request on the blocking pool.
async fn fetch<F, T>(f: F) -> Result<T, CatalogError>
where
    F: FnOnce() -> Result<T, CatalogError> + Send + 'static,
    T: Send + 'static,
{
    web::block(f).await.map_err(|err| match err {
        BlockingError::Error(err) => err,
        BlockingError::Canceled => CatalogError::FetchFailed("request canceled".to_owned()),
    })
}

fn load_session(db: &Db, id: &Identity) -> actix_web::Result<SessionState> {
    auth::session_state(db.get_ref(), id).map_err(|err| log_error(err, "Database error"))
}

/// Short-lived messages passed along a redirect as `?notice=<key>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    Welcome,
    WelcomeBack,
    LoggedOut,
    LoginRequired,
    ProfileRequiresLogin,
    InvalidCredentials,
    DuplicateUser,
    MissingFields,
    FavoriteAdded,
    FavoriteRemoved,
}

impl Notice {
    const ALL: [Notice; 10] = [
        Notice::Welcome,
        Notice::WelcomeBack,
        Notice::LoggedOut,
        Notice::LoginRequired,
        Notice::ProfileRequiresLogin,
        Notice::InvalidCredentials,
        Notice::DuplicateUser,
        Notice::MissingFields,
        Notice::FavoriteAdded,
        Notice::FavoriteRemoved,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Notice::Welcome => "welcome",
            Notice::WelcomeBack => "welcome_back",
            Notice::LoggedOut => "logged_out",
            Notice::LoginRequired => "login_required",
            Notice::ProfileRequiresLogin => "profile_login_required",
            Notice::InvalidCredentials => "invalid_credentials",
            Notice::DuplicateUser => "duplicate_user",
            Notice::MissingFields => "missing_fields",
            Notice::FavoriteAdded => "favorite_added",
            Notice::FavoriteRemoved => "favorite_removed",
        }
    }

    pub fn from_key(key: &str) -> Option<Notice> {
        Notice::ALL.iter().copied().find(|n| n.key() == key)
    }

    fn message(self) -> &'static str {
        match self {
            Notice::Welcome => "Account created. Welcome!",
            Notice::WelcomeBack => "Welcome back!",
            Notice::LoggedOut => "You have been logged out.",
            Notice::LoginRequired => "Please login to add favorites.",
            Notice::ProfileRequiresLogin => "Please login to view your profile.",
            Notice::InvalidCredentials => "Invalid email or password.",
            Notice::DuplicateUser => "User already exists with this email.",
            Notice::MissingFields => "Please fill in all fields.",
            Notice::FavoriteAdded => "Added to favorites.",
            Notice::FavoriteRemoved => "Removed from favorites.",
        }
    }

    fn is_error(self) -> bool {
        match self {
            Notice::LoginRequired
            | Notice::ProfileRequiresLogin
            | Notice::InvalidCredentials
            | Notice::DuplicateUser
            | Notice::MissingFields => true,
            _ => false,
        }
    }
}

#[derive(Serialize)]
struct NoticeView {
    message: &'static str,
    is_error: bool,
}

pub fn with_notice(path: &str, notice: Notice) -> String {
    let separator = if path.contains('?') { '&' } else { '?' };
    format!("{}{}notice={}", path, separator, notice.key())
}

fn is_local_path(next: &str) -> bool {
    // Browsers drop tabs and newlines from URLs, so `/\t/host` would
    // become a protocol-relative `//host`.
    next.starts_with('/')
        && !next.starts_with("//")
        && !next
            .chars()
            .any(|c| c == '\\' || c.is_control() || c.is_whitespace())
}

/// Accepts only local paths as redirect targets and drops any stale notice.
pub fn safe_next(next: Option<&str>, fallback: &str) -> String {
    let next = match next {
        Some(next) if is_local_path(next) => next,
        _ => return fallback.to_owned(),
    };
    let (path, query) = match next.find('?') {
        Some(index) => (&next[..index], &next[index + 1..]),
        None => (next, ""),
    };
    let query = query
        .split('&')
        .filter(|pair| !pair.is_empty() && !pair.starts_with("notice="))
        .collect::<Vec<_>>()
        .join("&");
    if query.is_empty() {
        path.to_owned()
    } else {
        format!("{}?{}", path, query)
    }
}

fn base_context(session: &SessionState, notice: Option<&str>) -> tera::Context {
    let mut ctx = tera::Context::new();
    ctx.insert("session", session);
    let notice = notice.and_then(Notice::from_key).map(|notice| NoticeView {
        message: notice.message(),
        is_error: notice.is_error(),
    });
    ctx.insert("notice", &notice);
    ctx.insert("query", "");
    ctx
}

pub fn format_runtime(minutes: u32) -> String {
    format!("{}h {}m", minutes / 60, minutes % 60)
}

/// Whole US dollars with thousands separators, e.g. `$63,000,000`.
pub fn format_currency(amount: u64) -> String {
    let digits = amount.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    out.push('$');
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

pub fn release_year(date: &str) -> Option<&str> {
    match date.get(..4) {
        Some(year) if year.chars().all(|c| c.is_ascii_digit()) => Some(year),
        _ => None,
    }
}

fn format_rating(vote_average: f64) -> String {
    format!("{:.1}", vote_average)
}

/// Page numbers to show around `current`: the first and last page plus two
/// on either side, with `None` marking a gap.
pub fn page_window(current: u32, total: u32) -> Vec<Option<u32>> {
    if total <= 1 {
        return Vec::new();
    }
    let current = current.max(1).min(total);
    let low = current.saturating_sub(2).max(1);
    let high = (current + 2).min(total);
    let mut pages = vec![1];
    pages.extend(low..=high);
    pages.push(total);
    pages.dedup();

    let mut window = Vec::with_capacity(pages.len() + 2);
    let mut last = 0;
    for page in pages {
        if page <= last {
            continue;
        }
        if page > last + 1 && last != 0 {
            window.push(None);
        }
        window.push(Some(page));
        last = page;
    }
    window
}

#[derive(Serialize)]
struct PageLink {
    number: Option<u32>,
    url: String,
    current: bool,
}

#[derive(Serialize)]
struct Pagination {
    prev: Option<String>,
    next: Option<String>,
    links: Vec<PageLink>,
}

impl Pagination {
    fn new<F: Fn(u32) -> String>(current: u32, total: u32, url: F) -> Option<Pagination> {
        if total <= 1 {
            return None;
        }
        let links = page_window(current, total)
            .into_iter()
            .map(|number| PageLink {
                number,
                url: number.map(&url).unwrap_or_default(),
                current: number == Some(current),
            })
            .collect();
        Some(Pagination {
            prev: if current > 1 { Some(url(current - 1)) } else { None },
            next: if current < total { Some(url(current + 1)) } else { None },
            links,
        })
    }
}

fn listing_url(category: Category, query: Option<&str>, page: u32) -> String {
    let mut params = form_urlencoded::Serializer::new(String::new());
    match query {
        Some(query) => params.append_pair("q", query),
        None => params.append_pair("tab", category.slug()),
    };
    params.append_pair("page", &page.to_string());
    format!("/?{}", params.finish())
}

#[derive(Serialize)]
struct MovieCard {
    id: u64,
    url: String,
    title: String,
    overview: String,
    poster_url: String,
    rating: String,
    year: Option<String>,
    is_favorite: bool,
}

impl MovieCard {
    fn new(movie: &Movie, user: Option<&User>) -> MovieCard {
        MovieCard {
            id: movie.id,
            url: format!("/movie/{}", movie.id),
            title: movie.title.clone(),
            overview: movie.overview.clone(),
            poster_url: poster_url(movie.poster_path.as_deref()),
            rating: format_rating(movie.vote_average),
            year: release_year(&movie.release_date).map(str::to_owned),
            is_favorite: user.map_or(false, |user| user.is_favorite(movie.id)),
        }
    }
}

#[derive(Serialize)]
struct Tab {
    slug: &'static str,
    label: &'static str,
    url: String,
    active: bool,
}

#[derive(Deserialize)]
pub struct ListParams {
    tab: Option<String>,
    q: Option<String>,
    page: Option<String>,
    notice: Option<String>,
}

async fn index(
    id: Identity,
    params: web::Query<ListParams>,
    tera: Tera,
    db: Db,
    catalog: Catalog,
) -> actix_web::Result<HttpResponse> {
    let session = load_session(&db, &id)?;
    let query = params
        .q
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(str::to_owned);
    let category = params
        .tab
        .as_deref()
        .and_then(Category::from_slug)
        .unwrap_or(Category::Popular);
    // Anything that is not a page number falls back to the first page.
    let page = params
        .page
        .as_deref()
        .and_then(|p| p.trim().parse::<u32>().ok())
        .unwrap_or(1)
        .max(1)
        .min(MAX_PAGES);

    let client = catalog.get_ref().clone();
    let fetched = match query.clone() {
        Some(query) => fetch(move || client.search(&query, page)).await,
        None => fetch(move || client.list(category, page)).await,
    };

    let mut ctx = base_context(&session, params.notice.as_deref());
    let tabs = Category::ALL
        .iter()
        .map(|c| Tab {
            slug: c.slug(),
            label: c.label(),
            url: listing_url(*c, None, 1),
            active: query.is_none() && *c == category,
        })
        .collect::<Vec<_>>();
    ctx.insert("tabs", &tabs);
    ctx.insert("searching", &query.is_some());
    ctx.insert("query", query.as_deref().unwrap_or(""));

    let (page, movies, total_results, pagination, error) = match fetched {
        Ok(result) => {
            let total_pages = capped_total_pages(result.total_pages);
            let page = page.min(total_pages.max(1));
            let movies = result
                .results
                .iter()
                .map(|movie| MovieCard::new(movie, session.user.as_ref()))
                .collect::<Vec<_>>();
            let pagination = Pagination::new(page, total_pages, |p| {
                listing_url(category, query.as_deref(), p)
            });
            (page, movies, result.total_results, pagination, None)
        }
        Err(err) => {
            warn!("failed to fetch movies: {}", err);
            (
                page,
                Vec::new(),
                0,
                None,
                Some("Failed to fetch movies. Please try again."),
            )
        }
    };
    ctx.insert("current_url", &listing_url(category, query.as_deref(), page));
    ctx.insert("movies", &movies);
    ctx.insert("total_results", &total_results);
    ctx.insert("pagination", &pagination);
    ctx.insert("error", &error);

    let body = render(&tera, "index.html", &ctx)?;
    Ok(HttpResponse::Ok().content_type("text/html").body(body))
}

#[derive(Serialize)]
struct MovieView {
    id: u64,
    title: String,
    tagline: Option<String>,
    overview: String,
    poster_url: String,
    backdrop_url: String,
    rating: String,
    year: Option<String>,
    runtime: Option<String>,
    homepage: Option<String>,
    genres: Vec<Genre>,
    status: String,
    original_language: String,
    budget: Option<String>,
    revenue: Option<String>,
    production_companies: Vec<Company>,
    is_favorite: bool,
}

impl MovieView {
    fn new(details: MovieDetails, user: Option<&User>) -> MovieView {
        MovieView {
            id: details.id,
            tagline: details.tagline.filter(|t| !t.is_empty()),
            poster_url: poster_url(details.poster_path.as_deref()),
            backdrop_url: backdrop_url(details.backdrop_path.as_deref()),
            rating: format_rating(details.vote_average),
            year: release_year(&details.release_date).map(str::to_owned),
            runtime: details.runtime.filter(|m| *m > 0).map(format_runtime),
            homepage: details.homepage.filter(|h| !h.is_empty()),
            original_language: details.original_language.to_uppercase(),
            budget: Some(details.budget).filter(|b| *b > 0).map(format_currency),
            revenue: Some(details.revenue).filter(|r| *r > 0).map(format_currency),
            is_favorite: { let id = details.id; user.map_or(false, |user| user.is_favorite(id)) },
            title: details.title,
            overview: details.overview,
            genres: details.genres,
            status: details.status,
            production_companies: details.production_companies,
        }
    }
}

#[derive(Deserialize)]
pub struct NoticeParams {
    notice: Option<String>,
}

async fn movie(
    id: Identity,
    path: web::Path<u64>,
    params: web::Query<NoticeParams>,
    tera: Tera,
    db: Db,
    catalog: Catalog,
) -> actix_web::Result<HttpResponse> {
    let movie_id = path.into_inner();
    let session = load_session(&db, &id)?;
    let client = catalog.get_ref().clone();
    let mut ctx = base_context(&session, params.notice.as_deref());
    match fetch(move || client.details(movie_id)).await {
        Ok(details) => {
            ctx.insert("movie", &MovieView::new(details, session.user.as_ref()));
            let body = render(&tera, "movie.html", &ctx)?;
            Ok(HttpResponse::Ok().content_type("text/html").body(body))
        }
        Err(err) => {
            warn!("failed to load movie {}: {}", movie_id, err);
            let body = render(&tera, "not_found.html", &ctx)?;
            Ok(HttpResponse::NotFound().content_type("text/html").body(body))
        }
    }
}

#[derive(Serialize, Deserialize)]
pub struct FavoriteParams {
    next: Option<String>,
}

async fn favorite(
    id: Identity,
    path: web::Path<u64>,
    params: web::Form<FavoriteParams>,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    let movie_id = path.into_inner();
    let next = safe_next(params.next.as_deref(), &format!("/movie/{}", movie_id));
    match auth::toggle_favorite(db.get_ref(), &id, movie_id) {
        Ok((_user, true)) => Ok(redirect(&with_notice(&next, Notice::FavoriteAdded))),
        Ok((_user, false)) => Ok(redirect(&with_notice(&next, Notice::FavoriteRemoved))),
        Err(AuthError::NotAuthenticated) => {
            Ok(redirect(&with_notice("/login", Notice::LoginRequired)))
        }
        Err(err) => Err(log_error(err, "Database error")),
    }
}

#[derive(Serialize)]
struct ProfileView {
    name: String,
    email: String,
    initial: String,
    favorite_count: usize,
}

async fn profile(
    id: Identity,
    params: web::Query<NoticeParams>,
    tera: Tera,
    db: Db,
    catalog: Catalog,
) -> actix_web::Result<HttpResponse> {
    let session = load_session(&db, &id)?;
    let user = match &session.user {
        Some(user) => user,
        None => {
            return Ok(redirect(&with_notice(
                "/login",
                Notice::ProfileRequiresLogin,
            )))
        }
    };

    // One request per favorite; any failure drops the whole list.
    let requests = user.favorite_movies.iter().map(|movie_id| {
        let client = catalog.get_ref().clone();
        let movie_id = *movie_id;
        fetch(move || client.details(movie_id))
    });
    let (favorites, favorites_error) = match try_join_all(requests).await {
        Ok(details) => (details.into_iter().map(Movie::from).collect(), false),
        Err(err) => {
            warn!("failed to fetch favorite movies: {}", err);
            (Vec::new(), true)
        }
    };

    let mut ctx = base_context(&session, params.notice.as_deref());
    ctx.insert(
        "profile",
        &ProfileView {
            name: user.name.clone(),
            email: user.email.clone(),
            initial: user
                .name
                .chars()
                .next()
                .map(|c| c.to_uppercase().collect())
                .unwrap_or_default(),
            favorite_count: user.favorite_movies.len(),
        },
    );
    let cards = favorites
        .iter()
        .map(|movie| MovieCard::new(movie, Some(user)))
        .collect::<Vec<_>>();
    ctx.insert("movies", &cards);
    ctx.insert("favorites_error", &favorites_error);
    ctx.insert("current_url", "/profile");
    let body = render(&tera, "profile.html", &ctx)?;
    Ok(HttpResponse::Ok().content_type("text/html").body(body))
}

async fn login(
    id: Identity,
    params: web::Query<NoticeParams>,
    tera: Tera,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    let session = load_session(&db, &id)?;
    let ctx = base_context(&session, params.notice.as_deref());
    let body = render(&tera, "login.html", &ctx)?;
    Ok(HttpResponse::Ok().content_type("text/html").body(body))
}

#[derive(Serialize, Deserialize)]
pub struct LoginParams {
    email: String,
    password: String,
}

async fn login_post(
    params: web::Form<LoginParams>,
    id: Identity,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    match auth::login(db.get_ref(), &id, params.email.trim(), &params.password) {
        Ok(_user) => Ok(redirect(&with_notice("/", Notice::WelcomeBack))),
        Err(AuthError::InvalidCredentials) => {
            Ok(redirect(&with_notice("/login", Notice::InvalidCredentials)))
        }
        Err(err) => Err(log_error(err, "Database error")),
    }
}

async fn register(
    id: Identity,
    params: web::Query<NoticeParams>,
    tera: Tera,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    let session = load_session(&db, &id)?;
    let ctx = base_context(&session, params.notice.as_deref());
    let body = render(&tera, "register.html", &ctx)?;
    Ok(HttpResponse::Ok().content_type("text/html").body(body))
}

#[derive(Serialize, Deserialize)]
pub struct RegisterParams {
    email: String,
    password: String,
    name: String,
}

async fn register_post(
    params: web::Form<RegisterParams>,
    id: Identity,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    let email = params.email.trim();
    let name = params.name.trim();
    if email.is_empty() || name.is_empty() {
        return Ok(redirect(&with_notice("/register", Notice::MissingFields)));
    }
    match auth::register(db.get_ref(), &id, email, &params.password, name) {
        Ok(_user) => Ok(redirect(&with_notice("/", Notice::Welcome))),
        Err(AuthError::DuplicateUser) => {
            Ok(redirect(&with_notice("/register", Notice::DuplicateUser)))
        }
        Err(err) => Err(log_error(err, "Database error")),
    }
}

async fn logout(id: Identity) -> actix_web::Result<HttpResponse> {
    auth::logout(&id);
    Ok(redirect(&with_notice("/login", Notice::LoggedOut)))
}

async fn placeholder() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("image/svg+xml")
        .body(PLACEHOLDER_SVG)
}
