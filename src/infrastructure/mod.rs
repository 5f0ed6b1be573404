pub mod yahoo_client;
