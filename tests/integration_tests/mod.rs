mod certification;
mod persistence;
mod transient;
