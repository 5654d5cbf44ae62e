//! Types and class signatures known to the jot checker.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const OBJECT: &str = "java.lang.Object";
pub const STRING: &str = "java.lang.String";
pub const THROWABLE: &str = "java.lang.Throwable";
pub const PRINT_STREAM: &str = "java.io.PrintStream";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    Int,
    Boolean,
    Void,
    Null,
    Class(String),
    /// A method type parameter. Erases to `Object`.
    Param(String),
    /// Result of a failed resolution, compatible with everything.
    Unknown,
}

impl Type {
    pub fn object() -> Self {
        Self::Class(OBJECT.to_string())
    }

    pub fn string() -> Self {
        Self::Class(STRING.to_string())
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Self::Null | Self::Class(_) | Self::Param(_))
    }

    /// Erased name used in method descriptors.
    pub fn erasure(&self) -> String {
        match self {
            Self::Int => "int".to_string(),
            Self::Boolean => "boolean".to_string(),
            Self::Void => "void".to_string(),
            Self::Null => "null".to_string(),
            Self::Class(name) => name.clone(),
            Self::Param(_) => OBJECT.to_string(),
            Self::Unknown => "?".to_string(),
        }
    }
}

pub fn descriptor(parameters: &[Type]) -> String {
    let erased: Vec<String> = parameters.iter().map(Type::erasure).collect();
    format!("({})", erased.join(","))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSig {
    pub name: String,
    pub ty: Type,
    pub is_static: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSig {
    pub name: String,
    pub parameters: Vec<Type>,
    pub ret: Type,
    pub is_static: bool,
}

impl MethodSig {
    pub fn descriptor(&self) -> String {
        descriptor(&self.parameters)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassSig {
    /// Fully qualified, nested classes joined with `.`.
    pub name: String,
    /// How the class is written where it is imported.
    pub display: String,
    pub superclass: Option<String>,
    pub fields: Vec<FieldSig>,
    pub methods: Vec<MethodSig>,
    pub constructors: Vec<Vec<Type>>,
    /// Simple names of member classes.
    pub nested: Vec<String>,
    pub builtin: bool,
}

impl ClassSig {
    pub fn new(name: impl Into<String>, display: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display: display.into(),
            superclass: Some(OBJECT.to_string()),
            fields: Vec::new(),
            methods: Vec::new(),
            constructors: Vec::new(),
            nested: Vec::new(),
            builtin: false,
        }
    }

    fn builtin(name: &str, superclass: Option<&str>) -> Self {
        let display = match name.strip_prefix("java.lang.") {
            Some(simple) => simple.to_string(),
            None => name.to_string(),
        };
        Self {
            superclass: superclass.map(str::to_string),
            builtin: true,
            ..Self::new(name, display)
        }
    }

    fn method(mut self, name: &str, parameters: &[Type], ret: Type, is_static: bool) -> Self {
        self.methods.push(MethodSig {
            name: name.to_string(),
            parameters: parameters.to_vec(),
            ret,
            is_static,
        });
        self
    }

    fn constructor(mut self, parameters: &[Type]) -> Self {
        self.constructors.push(parameters.to_vec());
        self
    }

    pub fn simple_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }
}

/// Exception classes the interpreter knows, with their superclass.
pub const EXCEPTIONS: &[(&str, &str)] = &[
    ("java.lang.Exception", THROWABLE),
    ("java.lang.RuntimeException", "java.lang.Exception"),
    ("java.lang.IllegalArgumentException", "java.lang.RuntimeException"),
    ("java.lang.IllegalStateException", "java.lang.RuntimeException"),
    ("java.lang.ArithmeticException", "java.lang.RuntimeException"),
    ("java.lang.NullPointerException", "java.lang.RuntimeException"),
];

fn builtins() -> Vec<ClassSig> {
    let object = ClassSig::builtin(OBJECT, None)
        .constructor(&[])
        .method("toString", &[], Type::string(), false)
        .method("equals", &[Type::object()], Type::Boolean, false)
        .method("hashCode", &[], Type::Int, false);
    let string = ClassSig::builtin(STRING, Some(OBJECT))
        .method("length", &[], Type::Int, false)
        .method("isEmpty", &[], Type::Boolean, false);
    let math = ClassSig::builtin("java.lang.Math", Some(OBJECT))
        .method("max", &[Type::Int, Type::Int], Type::Int, true)
        .method("min", &[Type::Int, Type::Int], Type::Int, true)
        .method("abs", &[Type::Int], Type::Int, true);
    let mut system = ClassSig::builtin("java.lang.System", Some(OBJECT));
    system.fields.push(FieldSig {
        name: "out".to_string(),
        ty: Type::Class(PRINT_STREAM.to_string()),
        is_static: true,
    });
    let print_stream = ClassSig::builtin(PRINT_STREAM, Some(OBJECT))
        .method("println", &[], Type::Void, false)
        .method("println", &[Type::object()], Type::Void, false)
        .method("print", &[Type::object()], Type::Void, false);
    let throwable = ClassSig::builtin(THROWABLE, Some(OBJECT))
        .constructor(&[])
        .constructor(&[Type::string()])
        .method("getMessage", &[], Type::string(), false);
    let unresolved = ClassSig::builtin("java.lang.Unresolved", Some("java.lang.RuntimeException")).constructor(&[Type::Int]);

    let mut classes = vec![object, string, math, system, print_stream, throwable, unresolved];
    for (name, superclass) in EXCEPTIONS {
        classes.push(
            ClassSig::builtin(name, Some(superclass))
                .constructor(&[])
                .constructor(&[Type::string()]),
        );
    }
    classes
}

/// Signatures of every class emitted so far, plus the built-in library.
#[derive(Debug, Clone)]
pub struct ClassPath {
    classes: HashMap<String, ClassSig>,
}

impl Default for ClassPath {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassPath {
    pub fn new() -> Self {
        let classes = builtins().into_iter().map(|class| (class.name.clone(), class)).collect();
        Self { classes }
    }

    pub fn get(&self, name: &str) -> Option<&ClassSig> {
        self.classes.get(name)
    }

    pub fn publish(&mut self, classes: impl IntoIterator<Item = ClassSig>) {
        for class in classes {
            self.classes.insert(class.name.clone(), class);
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_parameters_erase_to_object() {
        let generic = MethodSig {
            name: "show".into(),
            parameters: vec![Type::Param("T".into())],
            ret: Type::Void,
            is_static: true,
        };
        let concrete = MethodSig {
            parameters: vec![Type::object()],
            ..generic.clone()
        };
        assert_eq!(generic.descriptor(), concrete.descriptor());
        assert_eq!(generic.descriptor(), "(java.lang.Object)");
    }

    #[test]
    fn builtins_are_on_the_class_path() {
        let path = ClassPath::new();
        assert_eq!(path.get(STRING).map(|class| class.display.as_str()), Some("String"));
        assert_eq!(path.get(PRINT_STREAM).map(|class| class.display.as_str()), Some(PRINT_STREAM));
        let unresolved = path.get("java.lang.Unresolved").unwrap();
        assert_eq!(unresolved.constructors, vec![vec![Type::Int]]);
    }
}
