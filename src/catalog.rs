use crate::model::*;
use log::{debug, warn};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

pub const POSTER_BASE_URL: &str = "https://image.tmdb.org/t/p/w500";
pub const BACKDROP_BASE_URL: &str = "https://image.tmdb.org/t/p/w1280";
pub const PLACEHOLDER_URL: &str = "/placeholder.svg";
/// The catalog refuses to serve pages past this one.
pub const MAX_PAGES: u32 = 500;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to fetch from catalog: {0}")]
    FetchFailed(String),
    #[error("movie not found")]
    NotFound,
}

impl From<reqwest::Error> for CatalogError {
    fn from(err: reqwest::Error) -> Self {
        CatalogError::FetchFailed(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Popular,
    NowPlaying,
    TopRated,
    Upcoming,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Popular,
        Category::NowPlaying,
        Category::TopRated,
        Category::Upcoming,
    ];

    /// Name used for the category in page URLs.
    pub fn slug(self) -> &'static str {
        match self {
            Category::Popular => "popular",
            Category::NowPlaying => "now-playing",
            Category::TopRated => "top-rated",
            Category::Upcoming => "upcoming",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Category> {
        Category::ALL.iter().copied().find(|c| c.slug() == slug)
    }

    pub fn label(self) -> &'static str {
        match self {
            Category::Popular => "Popular",
            Category::NowPlaying => "Now Playing",
            Category::TopRated => "Top Rated",
            Category::Upcoming => "Upcoming",
        }
    }

    fn endpoint(self) -> &'static str {
        match self {
            Category::Popular => "/movie/popular",
            Category::NowPlaying => "/movie/now_playing",
            Category::TopRated => "/movie/top_rated",
            Category::Upcoming => "/movie/upcoming",
        }
    }
}

pub fn poster_url(path: Option<&str>) -> String {
    image_url(POSTER_BASE_URL, path)
}

pub fn backdrop_url(path: Option<&str>) -> String {
    image_url(BACKDROP_BASE_URL, path)
}

fn image_url(base: &str, path: Option<&str>) -> String {
    match path {
        Some(path) if !path.is_empty() => format!("{}{}", base, path),
        _ => PLACEHOLDER_URL.to_owned(),
    }
}

pub fn capped_total_pages(total_pages: u32) -> u32 {
    total_pages.min(MAX_PAGES)
}

/// Blocking client for the TMDB v3 API. Cheap to clone.
#[derive(Clone)]
pub struct TmdbClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl TmdbClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, CatalogError> {
        let http = Client::builder().build()?;
        Ok(TmdbClient {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key: api_key.to_owned(),
        })
    }

    pub fn list(&self, category: Category, page: u32) -> Result<MoviePage, CatalogError> {
        self.get(category.endpoint(), &[("page", page.to_string())])
    }

    pub fn search(&self, query: &str, page: u32) -> Result<MoviePage, CatalogError> {
        self.get(
            "/search/movie",
            &[("query", query.to_owned()), ("page", page.to_string())],
        )
    }

    pub fn details(&self, movie_id: u64) -> Result<MovieDetails, CatalogError> {
        self.get(&format!("/movie/{}", movie_id), &[])
    }

    fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, CatalogError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {} {:?}", url, params);
        let response = self
            .http
            .get(&url)
            .query(&[("api_key", self.api_key.as_str())])
            .query(params)
            .send()?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(CatalogError::NotFound);
        }
        if !status.is_success() {
            warn!("catalog answered {} for {}", status, path);
            return Err(CatalogError::FetchFailed(format!("status {}", status)));
        }
        Ok(response.json()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    #[test]
    fn image_urls() {
        assert_eq!(poster_url(None), PLACEHOLDER_URL);
        assert_eq!(poster_url(Some("")), PLACEHOLDER_URL);
        assert_eq!(
            poster_url(Some("/x.jpg")),
            "https://image.tmdb.org/t/p/w500/x.jpg"
        );
        assert_eq!(
            backdrop_url(Some("/x.jpg")),
            "https://image.tmdb.org/t/p/w1280/x.jpg"
        );
        assert_eq!(backdrop_url(None), PLACEHOLDER_URL);
    }

    #[test]
    fn page_cap() {
        assert_eq!(capped_total_pages(1000), 500);
        assert_eq!(capped_total_pages(500), 500);
        assert_eq!(capped_total_pages(12), 12);
    }

    #[test]
    fn slugs() {
        for category in Category::ALL.iter() {
            assert_eq!(Category::from_slug(category.slug()), Some(*category));
        }
        assert_eq!(Category::from_slug("search"), None);
    }

    #[test]
    fn list_sends_key_and_page() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/movie/top_rated")
                .query_param("api_key", "secret")
                .query_param("page", "3");
            then.status(200).json_body(json!({
                "page": 3,
                "total_pages": 1000,
                "total_results": 20000,
                "results": [{
                    "id": 238,
                    "title": "The Godfather",
                    "overview": "Spanning the years 1945 to 1955...",
                    "poster_path": "/3bhkrj58Vtu7enYsRolD1fZdja1.jpg",
                    "backdrop_path": null,
                    "vote_average": 8.7,
                    "release_date": "1972-03-14",
                    "genre_ids": [18, 80]
                }]
            }));
        });

        let client = TmdbClient::new(&server.base_url(), "secret").unwrap();
        let page = client.list(Category::TopRated, 3).unwrap();
        mock.assert();
        assert_eq!(page.page, 3);
        assert_eq!(page.total_pages, 1000);
        assert_eq!(page.results.len(), 1);
        assert_eq!(page.results[0].title, "The Godfather");
        assert_eq!(page.results[0].backdrop_path, None);
    }

    #[test]
    fn search_sends_query() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/search/movie")
                .query_param("query", "fight club")
                .query_param("page", "1");
            then.status(200)
                .json_body(json!({"page": 1, "total_pages": 0, "total_results": 0, "results": []}));
        });

        let client = TmdbClient::new(&server.base_url(), "secret").unwrap();
        let page = client.search("fight club", 1).unwrap();
        mock.assert();
        assert!(page.results.is_empty());
    }

    #[test]
    fn details_decode() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/movie/550");
            then.status(200).json_body(json!({
                "id": 550,
                "title": "Fight Club",
                "overview": "A ticking-time-bomb insomniac...",
                "poster_path": "/pB8BM7pdSp6B6Ih7QZ4DrQ3PmJK.jpg",
                "backdrop_path": "/hZkgoQYus5vegHoetLkCJzb17zJ.jpg",
                "vote_average": 8.4,
                "release_date": "1999-10-15",
                "tagline": "Mischief. Mayhem. Soap.",
                "runtime": 139,
                "budget": 63000000,
                "revenue": 100853753,
                "genres": [{"id": 18, "name": "Drama"}],
                "production_companies": [{"id": 508, "name": "Regency Enterprises", "logo_path": null}],
                "status": "Released",
                "original_language": "en",
                "homepage": null
            }));
        });

        let client = TmdbClient::new(&server.base_url(), "secret").unwrap();
        let details = client.details(550).unwrap();
        assert_eq!(details.runtime, Some(139));
        assert_eq!(details.genres[0].name, "Drama");
        assert_eq!(details.production_companies.len(), 1);
        assert_eq!(details.homepage, None);
    }

    #[test]
    fn errors() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/movie/popular");
            then.status(500);
        });
        server.mock(|when, then| {
            when.method(GET).path("/movie/1");
            then.status(404);
        });
        server.mock(|when, then| {
            when.method(GET).path("/movie/upcoming");
            then.status(200).body("not json");
        });

        let client = TmdbClient::new(&server.base_url(), "secret").unwrap();
        assert!(matches!(
            client.list(Category::Popular, 1),
            Err(CatalogError::FetchFailed(_))
        ));
        assert!(matches!(client.details(1), Err(CatalogError::NotFound)));
        assert!(matches!(
            client.list(Category::Upcoming, 1),
            Err(CatalogError::FetchFailed(_))
        ));
    }
}
