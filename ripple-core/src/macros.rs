//! Construction macros for raw aggregates.

/// Build a raw [`Object`](crate::reactive::Object).
///
/// ```
/// use ripple_core::object;
///
/// let user = object! { "name" => "ada", "age" => 36 };
/// assert_eq!(user.len(), 2);
/// ```
#[macro_export]
macro_rules! object {
    () => {
        $crate::reactive::Object::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let obj = $crate::reactive::Object::new();
        $(
            obj.insert($key, $value);
        )+
        obj
    }};
}

/// Build a raw [`Array`](crate::reactive::Array).
///
/// ```
/// use ripple_core::array;
///
/// let list = array![1, "two", 3.5];
/// assert_eq!(list.len(), 3);
/// ```
#[macro_export]
macro_rules! array {
    () => {
        $crate::reactive::Array::new()
    };
    ($($value:expr),+ $(,)?) => {{
        let arr = $crate::reactive::Array::new();
        $(
            arr.push($value);
        )+
        arr
    }};
}
