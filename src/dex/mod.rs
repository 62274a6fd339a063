pub mod raydium;
