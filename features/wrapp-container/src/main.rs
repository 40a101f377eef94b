use std::{io, sync::Arc, thread, time::Duration};

use wrapp_container::{
    events::CONTAINER_CLOSED, Container, Error, Factory, Lifetime, Service, ServiceFn,
};

#[derive(Debug)]
struct Greeting {
    text: String,
}
impl Service for Greeting {}

fn main() {
    let container = Container::new([
        Factory::new(|| "world".to_string()),
        Factory::new(|name: Arc<String>| Greeting {
            text: format!("hello {name}"),
        }),
        Factory::new(|greeting: Arc<Greeting>, lifetime: Lifetime| {
            ServiceFn::new(move || {
                while !lifetime.is_cancelled() {
                    println!("{}", greeting.text);
                    thread::sleep(Duration::from_millis(100));
                }
                Ok::<_, io::Error>(())
            })
        }),
    ])
    .unwrap();

    container
        .events()
        .unwrap()
        .subscribe(CONTAINER_CLOSED, |error: Option<Error>| {
            println!("closed, error: {error:?}")
        });

    container.start().unwrap();
    println!("{:?}", container);

    thread::sleep(Duration::from_millis(250));
    container.close().unwrap();
}
