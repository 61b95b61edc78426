use actix_web::web;
use reqwest::Client;

use crate::{
    page,
    proxy::{self, FETCH_ENDPOINT, ProxySettings},
};

/// Registers the page and the JSON endpoint along with the state they share
///
/// Called once per worker.
pub fn routes(client: Client, settings: ProxySettings) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg| {
        cfg.app_data(web::Data::new(client))
            .app_data(web::Data::new(settings))
            .app_data(proxy::json_config())
            .app_data(page::form_config())
            .route("/", web::get().to(page::index))
            .route("/", web::post().to(page::submit))
            .route(FETCH_ENDPOINT, web::post().to(proxy::fetch_m3u8));
    }
}
