pub mod meta_routes;
pub mod mod_routes;
pub mod server_routes;
