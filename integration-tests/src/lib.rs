pub mod test_systems;
