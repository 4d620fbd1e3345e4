pub mod game_manager;
pub mod game_session;
pub mod game_socket;
