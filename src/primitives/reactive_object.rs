// ============================================================================
// reactive-core - Reactive Object
// A transparent façade over a backing record, synthesizing per-property
// Cells on demand (SPEC_FULL.md §4.6). Realized as a `HashMap<String,
// PropertyValue>`-backed bag per §4.6.1, since Rust has neither a dynamic
// property bag nor a prototype chain.
// ============================================================================

use std::any::Any;
use std::collections::HashMap;
use std::rc::Rc;

use crate::core::context::current_frame_id;
use crate::core::error::ReactiveError;
use crate::primitives::derived::DerivedCellInner;
use crate::primitives::source::SourceCellInner;

type ErasedGetter = Rc<dyn Fn(&ReactiveObject) -> Rc<dyn Any>>;
type ErasedSetter = Rc<dyn Fn(&ReactiveObject, Rc<dyn Any>)>;

/// A registered property's backing (SPEC_FULL.md §4.6.1). `Field` is a
/// plain record write; `Getter`/`Accessor` stand in for "an accessor
/// inherited anywhere on the prototype chain" — registered explicitly at
/// construction time instead of discovered dynamically.
enum PropertyValue {
    Field(Rc<dyn Any>),
    Getter(ErasedGetter),
    Accessor(ErasedGetter, ErasedSetter),
}

/// A property's synthesized Cell (§4.6 "Cell synthesis for K"), cached so
/// `ref_for_property` returns the same object for the facade's lifetime.
/// `Clone` is just an `Rc` bump, used to pull a cell out of `cells` before
/// calling into it so a reentrant synthesis doesn't double-borrow the map.
#[derive(Clone)]
enum PropertyCell {
    Source(Rc<SourceCellInner<Rc<dyn Any>>>),
    Derived(Rc<DerivedCellInner<Rc<dyn Any>>>),
}

impl PropertyCell {
    fn get(&self) -> Rc<dyn Any> {
        match self {
            PropertyCell::Source(s) => s.get(),
            PropertyCell::Derived(d) => d.get().unwrap_or_else(|e| panic!("{}", e)),
        }
    }

    fn set(&self, value: Rc<dyn Any>) {
        match self {
            PropertyCell::Source(s) => s.set_value(value),
            PropertyCell::Derived(d) => d.set(value),
        }
    }
}

/// Identity (`Rc::ptr_eq`) equality for the erased property payload — the
/// facade has no way to deep-compare arbitrary `dyn Any` values, and
/// SPEC_FULL.md's Non-goals already rule out "automatic memoization of
/// equality beyond identity-of-last-computed-value".
fn identity_equals(a: &Rc<dyn Any>, b: &Rc<dyn Any>) -> bool {
    Rc::ptr_eq(a, b)
}

struct ReactiveObjectInner {
    backing: std::cell::RefCell<HashMap<String, PropertyValue>>,
    cells: std::cell::RefCell<HashMap<String, PropertyCell>>,
}

/// Transparent façade over a backing record (SPEC_FULL.md §4.6).
#[derive(Clone)]
pub struct ReactiveObject(Rc<ReactiveObjectInner>);

impl ReactiveObject {
    pub fn builder() -> ReactiveObjectBuilder {
        ReactiveObjectBuilder { backing: HashMap::new() }
    }

    /// Typed read of property `key` (§4.6 "Read of key K"). Panics with
    /// [`ReactiveError::UnknownProperty`] if `key` was never registered.
    pub fn get<T: Clone + 'static>(&self, key: &str) -> T {
        let value = self.get_erased(key);
        value
            .downcast_ref::<T>()
            .unwrap_or_else(|| panic!("property {key:?} is not of the requested type"))
            .clone()
    }

    /// Typed write of property `key` (§4.6 "Write of key K to value V").
    pub fn set<T: 'static>(&self, key: &str, value: T) {
        self.set_erased(key, Rc::new(value));
    }

    /// The stable Cell backing property `key`, synthesizing it if absent
    /// (§4.6 "Property-ref accessor"). Returns the same object on every
    /// call for the facade's lifetime.
    pub fn ref_for_property(&self, key: &str) -> PropertyRef {
        if !self.0.cells.borrow().contains_key(key) && !self.0.backing.borrow().contains_key(key) {
            panic!("{}", ReactiveError::UnknownProperty(key.to_string()));
        }
        self.synthesize_cell(key);
        PropertyRef { object: self.clone(), key: key.to_string() }
    }

    pub fn is_reactive_object<T: Any>(value: &T) -> bool {
        (value as &dyn Any).is::<ReactiveObject>()
    }

    fn get_erased(&self, key: &str) -> Rc<dyn Any> {
        // Clone the cell out of the map (an Rc bump) before calling into it:
        // a getter-backed cell's recipe can read a sibling property and
        // re-enter this function, which would try to borrow `cells` again
        // while a `Ref` from this lookup was still alive.
        let cell = self.0.cells.borrow().get(key).cloned();
        if let Some(cell) = cell {
            return cell.get();
        }

        let has_frame = current_frame_id().is_some();
        if has_frame {
            self.synthesize_cell(key);
            let cell = self.0.cells.borrow().get(key).cloned().expect("just synthesized");
            return cell.get();
        }

        let value = self.0.backing.borrow().get(key).map(|v| match v {
            PropertyValue::Field(v) => Resolved::Value(v.clone()),
            PropertyValue::Getter(g) => Resolved::Getter(g.clone()),
            PropertyValue::Accessor(g, _) => Resolved::Getter(g.clone()),
        });
        match value {
            Some(Resolved::Value(v)) => v,
            Some(Resolved::Getter(g)) => g(self),
            None => panic!("{}", ReactiveError::UnknownProperty(key.to_string())),
        }
    }

    fn set_erased(&self, key: &str, value: Rc<dyn Any>) {
        let cell = self.0.cells.borrow().get(key).cloned();
        if let Some(cell) = cell {
            cell.set(value);
            return;
        }

        let action = match self.0.backing.borrow().get(key) {
            Some(PropertyValue::Field(_)) | None => WriteAction::PlainWrite,
            Some(PropertyValue::Getter(_)) => WriteAction::Readonly,
            Some(PropertyValue::Accessor(_, _)) => WriteAction::CallSetter,
        };

        match action {
            WriteAction::PlainWrite => {
                self.0.backing.borrow_mut().insert(key.to_string(), PropertyValue::Field(value));
            }
            WriteAction::Readonly => panic!("{}", ReactiveError::ReadonlyViolation),
            WriteAction::CallSetter => {
                let setter = self.0.backing.borrow().get(key).and_then(|v| match v {
                    PropertyValue::Accessor(_, setter) => Some(setter.clone()),
                    _ => None,
                });
                if let Some(setter) = setter {
                    setter(self, value);
                }
            }
        }
    }

    /// Cell synthesis for K (§4.6 "Cell synthesis for K"). A no-op if a
    /// cell is already cached.
    fn synthesize_cell(&self, key: &str) {
        if self.0.cells.borrow().contains_key(key) {
            return;
        }
        let backing = self.0.backing.borrow();
        let cell = match backing.get(key) {
            Some(PropertyValue::Field(v)) => {
                PropertyCell::Source(SourceCellInner::with_equals(v.clone(), identity_equals, true))
            }
            Some(PropertyValue::Getter(getter)) => {
                let getter = getter.clone();
                let object = self.clone();
                PropertyCell::Derived(DerivedCellInner::with_equals(
                    move || Ok(getter(&object)),
                    identity_equals,
                ))
            }
            Some(PropertyValue::Accessor(getter, setter)) => {
                let getter = getter.clone();
                let setter = setter.clone();
                let object_r = self.clone();
                let object_w = self.clone();
                PropertyCell::Derived(DerivedCellInner::with_equals_writer(
                    move || Ok(getter(&object_r)),
                    identity_equals,
                    move |v| setter(&object_w, v),
                ))
            }
            None => return,
        };
        drop(backing);
        self.0.cells.borrow_mut().insert(key.to_string(), cell);
    }
}

impl std::fmt::Debug for ReactiveObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactiveObject")
            .field("properties", &self.0.backing.borrow().len())
            .finish()
    }
}

enum WriteAction {
    PlainWrite,
    Readonly,
    CallSetter,
}

/// Resolution of an unsynthesized backing entry, split out so the getter
/// closure runs after the `backing` borrow is dropped.
enum Resolved {
    Value(Rc<dyn Any>),
    Getter(ErasedGetter),
}

/// A stable handle onto one property's synthesized Cell, returned by
/// [`ReactiveObject::ref_for_property`].
#[derive(Clone)]
pub struct PropertyRef {
    object: ReactiveObject,
    key: String,
}

impl PropertyRef {
    pub fn get<T: Clone + 'static>(&self) -> T {
        self.object.get(&self.key)
    }

    pub fn set<T: 'static>(&self, value: T) {
        self.object.set(&self.key, value);
    }
}

pub struct ReactiveObjectBuilder {
    backing: HashMap<String, PropertyValue>,
}

impl ReactiveObjectBuilder {
    pub fn field<T: 'static>(mut self, key: impl Into<String>, value: T) -> Self {
        self.backing.insert(key.into(), PropertyValue::Field(Rc::new(value)));
        self
    }

    pub fn getter<T: 'static>(
        mut self,
        key: impl Into<String>,
        f: impl Fn(&ReactiveObject) -> T + 'static,
    ) -> Self {
        let getter: ErasedGetter = Rc::new(move |obj: &ReactiveObject| Rc::new(f(obj)) as Rc<dyn Any>);
        self.backing.insert(key.into(), PropertyValue::Getter(getter));
        self
    }

    pub fn accessor<T: 'static>(
        mut self,
        key: impl Into<String>,
        get: impl Fn(&ReactiveObject) -> T + 'static,
        set: impl Fn(&ReactiveObject, T) + 'static,
    ) -> Self {
        let getter: ErasedGetter = Rc::new(move |obj: &ReactiveObject| Rc::new(get(obj)) as Rc<dyn Any>);
        let setter: ErasedSetter = Rc::new(move |obj: &ReactiveObject, value: Rc<dyn Any>| {
            let value = value.downcast::<T>().unwrap_or_else(|_| panic!("accessor {key_name}: type mismatch", key_name = "setter"));
            let value = Rc::try_unwrap(value).unwrap_or_else(|_| panic!("accessor value has outstanding references"));
            set(obj, value);
        });
        self.backing.insert(key.into(), PropertyValue::Accessor(getter, setter));
        self
    }

    pub fn build(self) -> ReactiveObject {
        ReactiveObject(Rc::new(ReactiveObjectInner {
            backing: std::cell::RefCell::new(self.backing),
            cells: std::cell::RefCell::new(HashMap::new()),
        }))
    }
}
