pub mod rnaseq;
