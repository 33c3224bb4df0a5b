//! Example: Exposing native code to scripts

use std::sync::{Arc, Mutex};

use fos_bind::{BindConfig, BindingRegistry, ClassBinding, Environment, Module, ValueType};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default, Clone, Copy)]
struct Vec2 {
    x: f32,
    y: f32,
}

fos_bind::value_type!(Vec2);

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("fos_bind=debug".parse()?))
        .init();

    let stored = Arc::new(Mutex::new(Vec2 { x: 1.5, y: 2.3 }));

    let mut registry = BindingRegistry::new();
    registry.register("math", |module: &mut Module| {
        module.expose_function("add5", |n: i32| n + 5)?;
        module.expose_class(
            ClassBinding::new("Geometry")
                .function("hypot", |x: f64, y: f64| x.hypot(y))
                .function("describe", || "plane geometry helpers"),
        )?;
        Ok(())
    })?;

    let (get, set) = (stored.clone(), stored.clone());
    registry.register("vectors", move |module: &mut Module| {
        module.expose_value_type(
            ValueType::<Vec2>::new("Vec2")
                .field("x", |v: &Vec2| v.x, |v: &mut Vec2, x| v.x = x)
                .field("y", |v: &Vec2| v.y, |v: &mut Vec2, y| v.y = y),
        )?;

        let get = get.clone();
        module.expose_function("getStoredVec", move || *get.lock().unwrap_or_else(|e| e.into_inner()))?;

        let set = set.clone();
        module.expose_function("storeVec", move |v: Vec2| *set.lock().unwrap_or_else(|e| e.into_inner()) = v)?;
        Ok(())
    })?;

    let env = Environment::initialize(BindConfig::default(), &registry)?;
    println!("fOS Bind v{} initialized", fos_bind::VERSION);

    env.run_script(
        "console.log('add5(5) =', Module.add5(5));
         console.log('hypot =', Module.Geometry.hypot(3, 4));
         var vec = Module.getStoredVec();
         vec.x += 2.2;
         vec.y += 3.3;
         Module.storeVec(vec);",
        Some("demo"),
    );

    let vec = *stored.lock().unwrap_or_else(|e| e.into_inner());
    println!("Stored vector is now ({:.1}, {:.1})", vec.x, vec.y);

    env.deinitialize();
    Ok(())
}
