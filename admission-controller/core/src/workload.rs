/// A unit of deployable work submitted for admission.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Workload {
    pub namespace: String,

    /// Regular containers followed by init containers, each in declared
    /// order.
    pub containers: Vec<Container>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Container {
    pub name: String,
    pub image: String,
}

// === impl Workload ===

impl Workload {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            containers: Vec::new(),
        }
    }

    /// Builds a workload from a pod's regular and init containers.
    pub fn from_containers<C, I>(namespace: impl Into<String>, containers: C, init: I) -> Self
    where
        C: IntoIterator<Item = Container>,
        I: IntoIterator<Item = Container>,
    {
        Self {
            namespace: namespace.into(),
            containers: containers.into_iter().chain(init).collect(),
        }
    }

    pub fn with_container(mut self, name: impl Into<String>, image: impl Into<String>) -> Self {
        self.containers.push(Container::new(name, image));
        self
    }
}

// === impl Container ===

impl Container {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
        }
    }
}
