mod admission;
mod common;
mod matching;
