pub mod add_board;
pub mod gen_key;
pub mod init_board;
pub mod trusted_indexers;
