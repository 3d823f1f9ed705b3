pub mod client_ip;
pub mod current_user;
pub mod password;
pub mod permissions;
pub mod session;
