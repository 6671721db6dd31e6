use cranelift_entity::PrimaryMap;
use rustc_hash::FxHashMap;
use smol_str::SmolStr;
use stitch_ir::Type;

use crate::{EvalValue, ObjRef};

#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    Instance {
        class: SmolStr,
        fields: FxHashMap<SmolStr, EvalValue>,
    },
    Array {
        elem: Type,
        data: Vec<EvalValue>,
    },
    Str(String),
    Class(SmolStr),
}

impl Object {
    /// Internal name of the object's runtime class.
    pub fn class_name(&self) -> SmolStr {
        match self {
            Self::Instance { class, .. } => class.clone(),
            Self::Array { elem, .. } => format!("[{elem}").into(),
            Self::Str(_) => "java/lang/String".into(),
            Self::Class(_) => "java/lang/Class".into(),
        }
    }
}

#[derive(Debug, Default)]
pub struct Heap {
    objects: PrimaryMap<ObjRef, Object>,
}

impl Heap {
    pub fn alloc(&mut self, object: Object) -> ObjRef {
        self.objects.push(object)
    }

    pub fn new_instance(&mut self, class: &str) -> ObjRef {
        self.alloc(Object::Instance {
            class: class.into(),
            fields: FxHashMap::default(),
        })
    }

    pub fn new_string(&mut self, s: &str) -> ObjRef {
        self.alloc(Object::Str(s.to_string()))
    }

    pub fn get(&self, obj: ObjRef) -> Option<&Object> {
        self.objects.get(obj)
    }

    pub fn get_mut(&mut self, obj: ObjRef) -> Option<&mut Object> {
        self.objects.get_mut(obj)
    }

    pub fn class_of(&self, obj: ObjRef) -> Option<SmolStr> {
        self.get(obj).map(Object::class_name)
    }

    pub fn string(&self, obj: ObjRef) -> Option<&str> {
        match self.get(obj)? {
            Object::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn clear(&mut self) {
        self.objects.clear();
    }
}
